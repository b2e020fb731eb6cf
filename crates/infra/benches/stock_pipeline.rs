use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use apotheca_core::{AggregateId, DrugId, SupplierId};
use apotheca_events::{EventEnvelope, InMemoryEventBus};
use apotheca_infra::command_dispatcher::CommandDispatcher;
use apotheca_infra::event_store::InMemoryEventStore;
use apotheca_pharmacy::{
    Batch, BatchCommand, BatchId, EntryId, MovementKind, ReceiveBatch, RecordMovement,
};

const BATCH_AGGREGATE_TYPE: &str = "pharmacy.batch";

fn setup_dispatcher() -> CommandDispatcher<
    InMemoryEventStore,
    Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>,
> {
    let store = InMemoryEventStore::new();
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
        Arc::new(InMemoryEventBus::new());
    CommandDispatcher::new(store, bus)
}

fn receive_cmd(batch_id: BatchId, opening_qty: i64) -> BatchCommand {
    let today = Utc::now().date_naive();
    BatchCommand::ReceiveBatch(ReceiveBatch {
        batch_id,
        drug_id: DrugId::new(),
        supplier_id: SupplierId::new(),
        manufactured_on: today - ChronoDuration::days(30),
        expires_on: today + ChronoDuration::days(365),
        purchased_on: today,
        unit_cost: 250,
        unit_price: 400,
        opening_qty,
        low_stock_threshold: 10,
        user_id: None,
        occurred_at: Utc::now(),
    })
}

fn movement_cmd(batch_id: BatchId, kind: MovementKind, quantity: i64) -> BatchCommand {
    BatchCommand::RecordMovement(RecordMovement {
        batch_id,
        entry_id: EntryId::new(),
        kind,
        quantity,
        user_id: None,
        notes: None,
        from_location: None,
        to_location: None,
        occurred_at: Utc::now(),
    })
}

fn dispatch(
    dispatcher: &CommandDispatcher<
        InMemoryEventStore,
        Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>,
    >,
    batch_id: BatchId,
    command: BatchCommand,
) {
    dispatcher
        .dispatch(batch_id.0, BATCH_AGGREGATE_TYPE, command, |id| {
            Batch::empty(BatchId::new(id))
        })
        .unwrap();
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(1000);

    // First command on a fresh stream (no history to replay).
    group.bench_function("receive_batch_fresh", |b| {
        let dispatcher = setup_dispatcher();
        b.iter(|| {
            let batch_id = BatchId::new(AggregateId::new());
            dispatch(&dispatcher, batch_id, receive_cmd(batch_id, black_box(1_000_000)));
        });
    });

    // Movement against a growing stream (load + rehydrate + append).
    group.bench_function("record_movement_with_history", |b| {
        let dispatcher = setup_dispatcher();
        let batch_id = BatchId::new(AggregateId::new());
        dispatch(&dispatcher, batch_id, receive_cmd(batch_id, 1_000_000_000));

        b.iter(|| {
            dispatch(
                &dispatcher,
                batch_id,
                movement_cmd(batch_id, MovementKind::Inbound, black_box(1)),
            );
        });
    });

    group.finish();
}

fn bench_rehydration_cost(c: &mut Criterion) {
    let mut group = c.benchmark_group("rehydration_cost");

    // How command latency grows with stream length.
    for history_len in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(history_len));
        group.bench_with_input(
            BenchmarkId::from_parameter(history_len),
            &history_len,
            |b, &history_len| {
                let dispatcher = setup_dispatcher();
                let batch_id = BatchId::new(AggregateId::new());
                dispatch(&dispatcher, batch_id, receive_cmd(batch_id, 1_000_000_000));
                for _ in 0..history_len {
                    dispatch(
                        &dispatcher,
                        batch_id,
                        movement_cmd(batch_id, MovementKind::Inbound, 1),
                    );
                }

                b.iter(|| {
                    dispatch(
                        &dispatcher,
                        batch_id,
                        movement_cmd(batch_id, MovementKind::ReturnOut, black_box(1)),
                    );
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_command_execution_latency, bench_rehydration_cost);
criterion_main!(benches);
