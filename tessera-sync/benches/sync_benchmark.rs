use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tessera_sync::{
    LocalHub, MapView, Message, Payload, PeerId, RelayFrame, SyncPrimitive, SharedView, Topic,
};

fn bench_state_encode(c: &mut Criterion) {
    let topic = Topic::new("thr0w_leaflet_main").unwrap();
    let view = MapView::new(45.0, 7.0, 12.0);

    c.bench_function("state_encode_mapview", |b| {
        b.iter(|| {
            let payload = Payload::encode(black_box(&view)).unwrap();
            let msg = Message::state(topic.clone(), PeerId(1), payload);
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_state_decode(c: &mut Criterion) {
    let topic = Topic::new("thr0w_leaflet_main").unwrap();
    let payload = Payload::encode(&MapView::new(45.0, 7.0, 12.0)).unwrap();
    let encoded = RelayFrame::Deliver(Message::state(topic, PeerId(1), payload)).encode().unwrap();

    c.bench_function("state_decode_mapview", |b| {
        b.iter(|| {
            let frame = RelayFrame::decode(black_box(&encoded)).unwrap();
            if let RelayFrame::Deliver(msg) = frame {
                let view: MapView = msg.payload.unwrap().decode().unwrap();
                black_box(view);
            }
        })
    });
}

fn bench_hub_fan_out(c: &mut Criterion) {
    // One driver streaming to a 4x4 wall.
    let hub = LocalHub::new();
    let topic = Topic::new("bench").unwrap();
    let mut inboxes = Vec::new();
    let mut tiles = Vec::new();
    for id in 0..16 {
        let (endpoint, inbox) = hub.connect(PeerId(id));
        tiles.push(SyncPrimitive::new(topic.clone(), SharedView::new(MapView::default()), endpoint).unwrap());
        inboxes.push(inbox);
    }

    c.bench_function("hub_drive_16_tiles", |b| {
        b.iter(|| {
            tiles[0].drive().unwrap();
            for inbox in inboxes.iter_mut() {
                while let Ok(msg) = inbox.try_recv() {
                    black_box(msg);
                }
            }
        })
    });
}

fn bench_apply_remote_state(c: &mut Criterion) {
    let hub = LocalHub::new();
    let topic = Topic::new("bench").unwrap();
    let (endpoint, _inbox) = hub.connect(PeerId(1));
    let mut tile = SyncPrimitive::new(topic.clone(), SharedView::new(MapView::default()), endpoint).unwrap();
    let msg = Message::state(topic, PeerId(2), Payload::encode(&MapView::new(10.0, 20.0, 5.0)).unwrap());

    c.bench_function("apply_remote_state", |b| {
        b.iter(|| black_box(tile.handle(black_box(&msg))))
    });
}

criterion_group!(
    benches,
    bench_state_encode,
    bench_state_decode,
    bench_hub_fan_out,
    bench_apply_remote_state,
);
criterion_main!(benches);
