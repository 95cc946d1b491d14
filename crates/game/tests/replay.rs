use std::sync::Arc;
use std::time::Instant;

use framesync::game::{Arena, Keys, action, registry};
use framesync::sync::{LocalInput, LoopbackHub, Session, SessionConfig, SessionEvent};
use framesync::{Error, Registry, ReplayStack, ReplayValidator, Scene, state_hash};

const ROOM: u64 = 11;

fn shared_registry() -> Arc<Registry> {
    Arc::new(registry().unwrap())
}

fn arena() -> Arc<dyn Scene> {
    Arc::new(Arena::default())
}

/// Never steers left, so a left turn in a recording is always foreign.
fn steer(player: u32, round: u32) -> LocalInput {
    let keys = match (round / 12 + player) % 3 {
        0 => Keys::RIGHT,
        1 => Keys::UP | Keys::BOOST,
        _ => Keys::DOWN | Keys::RIGHT,
    };
    let actions = if round % 50 == 20 {
        vec![action::SPARK]
    } else {
        Vec::new()
    };
    LocalInput {
        keys: keys.bits(),
        actions,
    }
}

fn config(hash_interval: u32) -> SessionConfig {
    SessionConfig {
        snapshot_interval: 100,
        hash_interval,
        ..SessionConfig::default()
    }
}

fn record_solo(frames: u32, hash_interval: u32) -> ReplayStack {
    let hub = LoopbackHub::new();
    let mut host = Session::new(
        1,
        "host",
        Box::new(hub.connect()),
        shared_registry(),
        arena(),
        config(hash_interval),
    )
    .with_recording();
    host.host(ROOM, 1234).unwrap();
    let now = Instant::now();
    let mut round = 0;
    while host.frame() < Some(frames) {
        host.tick(now, &steer(1, round)).unwrap();
        round += 1;
    }
    host.take_recording().unwrap()
}

/// Host records while a second player joins partway through.
fn record_pair(frames: u32) -> ReplayStack {
    let hub = LoopbackHub::new();
    let registry = shared_registry();
    let mut host = Session::new(
        1,
        "host",
        Box::new(hub.connect()),
        Arc::clone(&registry),
        arena(),
        config(1),
    )
    .with_recording();
    let mut guest = Session::new(
        2,
        "guest",
        Box::new(hub.connect()),
        registry,
        arena(),
        config(1),
    )
    .with_player_config(serde_json::json!({ "speed": 5.0 }));
    let now = Instant::now();
    host.host(ROOM, 99).unwrap();
    for round in 0..20 {
        host.tick(now, &steer(1, round)).unwrap();
    }
    guest.join(ROOM, now).unwrap();
    for round in 20..2_000 {
        if host.frame() >= Some(frames) {
            break;
        }
        host.tick(now, &steer(1, round)).unwrap();
        if guest.frame().is_none_or(|f| f < frames) {
            guest.tick(now, &steer(2, round)).unwrap();
        }
    }
    assert_eq!(host.frame(), Some(frames));
    assert!(
        host.drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::PlayerAdmitted { player: 2, .. }))
    );
    host.take_recording().unwrap()
}

#[test]
fn test_validator_reproduces_recorded_hashes() {
    let stack = record_solo(320, 10);
    assert!(stack.snapshots.contains_key(&300));
    assert!(stack.state_hashes.contains_key(&310));

    let mut validator = ReplayValidator::new(stack, shared_registry(), arena());
    assert_eq!(validator.load_closest_frame(305).unwrap(), 300);
    assert_eq!(validator.run_to(310).unwrap(), 310);
    assert_eq!(validator.checked(), 1);
    assert_eq!(
        state_hash(validator.simulation().unwrap()).unwrap(),
        validator.stack().state_hashes[&310]
    );
}

#[test]
fn test_corrupted_input_fails_at_next_hash() {
    let mut stack = record_solo(320, 10);
    let recorded = stack
        .frames
        .get_mut(&1)
        .unwrap()
        .iter_mut()
        .find(|f| f.frame == 305)
        .unwrap();
    recorded.keys = Keys::LEFT.bits();

    let mut validator = ReplayValidator::new(stack, shared_registry(), arena());
    validator.load_closest_frame(300).unwrap();
    let err = validator.run_to(320).unwrap_err();
    assert!(matches!(err, Error::StateMismatch { frame: 310, .. }));
    assert!(err.is_fatal());
    assert!(validator.is_halted());
    assert_eq!(validator.frame(), Some(310));
    assert!(matches!(validator.step(), Err(Error::ValidatorHalted)));
}

#[test]
fn test_validate_whole_recording_with_late_joiner() {
    let stack = record_pair(150);
    assert!(stack.configs.contains_key(&2));
    assert!(stack.frames[&2].first().unwrap().frame > 0);

    let end = stack.end_frame();
    let hashes = stack.state_hashes.len();
    let mut validator = ReplayValidator::new(stack, shared_registry(), arena());
    assert_eq!(validator.validate_all().unwrap(), end);
    assert_eq!(end, 150);
    assert_eq!(validator.checked(), hashes);
}

#[test]
fn test_joiner_recording_keeps_room_seed() {
    let hub = LoopbackHub::new();
    let registry = shared_registry();
    let mut host = Session::new(
        1,
        "host",
        Box::new(hub.connect()),
        Arc::clone(&registry),
        arena(),
        config(1),
    );
    let mut guest = Session::new(2, "guest", Box::new(hub.connect()), registry, arena(), config(1))
        .with_recording();
    let now = Instant::now();
    host.host(ROOM, 4321).unwrap();
    guest.join(ROOM, now).unwrap();
    for round in 0..2_000 {
        if guest.frame() >= Some(60) {
            break;
        }
        host.tick(now, &steer(1, round)).unwrap();
        guest.tick(now, &steer(2, round)).unwrap();
    }
    assert_eq!(guest.frame(), Some(60));
    let recording = guest.take_recording().unwrap();
    assert_eq!(recording.seed, 4321);
    assert!(recording.frames.contains_key(&1));
}

#[test]
fn test_seek_backwards_reloads_snapshot() {
    let stack = record_pair(140);
    let mut validator = ReplayValidator::new(stack, shared_registry(), arena());
    assert_eq!(validator.seek(130).unwrap(), 130);
    assert_eq!(validator.seek(42).unwrap(), 42);
    assert_eq!(validator.frame(), Some(42));
    assert_eq!(
        state_hash(validator.simulation().unwrap()).unwrap(),
        validator.stack().state_hashes[&42]
    );
    assert_eq!(validator.seek(120).unwrap(), 120);
    assert!(!validator.is_halted());
}

#[test]
fn test_replay_file_survives_json() {
    let stack = record_solo(120, 5);
    let text = stack.to_json().unwrap();
    let restored = ReplayStack::from_json(&text).unwrap();
    assert_eq!(restored, stack);

    let mut validator = ReplayValidator::new(restored, shared_registry(), arena());
    assert_eq!(validator.validate_all().unwrap(), 120);
    assert_eq!(validator.checked(), 120 / 5);
}

#[test]
fn test_missing_snapshot() {
    let stack = record_solo(30, 10);
    let mut validator = ReplayValidator::new(stack, shared_registry(), arena());
    let mut empty = validator.stack().clone();
    empty.snapshots.clear();
    *validator.stack_mut() = empty;
    assert!(matches!(
        validator.load_closest_frame(20),
        Err(Error::NoSnapshot { frame: 20 })
    ));
}
