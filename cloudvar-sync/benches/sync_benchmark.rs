use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use cloudvar_sync::group::{GroupProtocol, Lists, PublicVariables};
use cloudvar_sync::{
    CloudConfig, CloudValue, ConfigLayer, DataId, ListOperation, ServerMessage, Timing,
    UpdateManager, VariableOperation,
};
use serde_json::json;
use std::hint::black_box;
use std::rc::Rc;

fn immediate_layer() -> Rc<ConfigLayer> {
    Rc::new(ConfigLayer::root(&CloudConfig {
        cache_time: Some(Timing::Disabled),
        upload_interval: Some(Timing::Disabled),
        ..Default::default()
    }))
}

fn bench_submit_upload_echo(c: &mut Criterion) {
    let layer = immediate_layer();
    let target = Rc::new(DataId::new("c1", "score"));
    let manager = UpdateManager::<VariableOperation>::new(target, layer, CloudValue::from(0));
    let mut n = 0;

    c.bench_function("variable_submit_upload_echo", |b| {
        b.iter(|| {
            n += 1;
            let done = manager.submit(VariableOperation::set(n));
            black_box(manager.upload().unwrap());
            manager.apply_cloud(VariableOperation::set(n));
            black_box(done);
        })
    });
}

fn bench_foreign_rebase(c: &mut Criterion) {
    let layer = immediate_layer();

    c.bench_function("list_rebase_100_pending", |b| {
        b.iter_batched(
            || {
                let target = Rc::new(DataId::new("l1", "names"));
                let manager =
                    UpdateManager::<ListOperation>::new(target, layer.clone(), Vec::new());
                let pending: Vec<_> = (0..100)
                    .map(|i| manager.submit(ListOperation::Push { value: CloudValue::from(i) }))
                    .collect();
                manager.upload().unwrap();
                (manager, pending)
            },
            |(manager, pending)| {
                manager.apply_cloud(ListOperation::Unshift {
                    value: CloudValue::from("x"),
                });
                black_box(manager.value().len());
                black_box(pending);
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_variable_update_decode(c: &mut Criterion) {
    let payload = json!((0..100)
        .map(|i| json!({"cvid": format!("c{}", i % 10), "value": i}))
        .collect::<Vec<_>>());

    c.bench_function("variable_update_decode_100", |b| {
        b.iter(|| {
            black_box(PublicVariables::decode_update(black_box(&payload)).unwrap());
        })
    });
}

fn bench_list_update_decode(c: &mut Criterion) {
    let frame = ServerMessage::ListUpdate(json!({
        "l1": (0..100).map(|i| json!({"action": "push", "value": i})).collect::<Vec<_>>(),
        "l2": [{"action": "empty"}, {"action": "insert", "index": 0, "value": "a"}],
    }))
    .encode()
    .unwrap();

    c.bench_function("list_update_parse_and_decode", |b| {
        b.iter(|| {
            let ServerMessage::ListUpdate(payload) = ServerMessage::decode(black_box(&frame)).unwrap()
            else {
                unreachable!();
            };
            black_box(Lists::decode_update(&payload).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_submit_upload_echo,
    bench_foreign_rebase,
    bench_variable_update_decode,
    bench_list_update_decode,
);
criterion_main!(benches);
