#![forbid(unsafe_code)]

use serde_json::{Map, Value, json};
use tokio::sync::broadcast::error::TryRecvError;
use vtt_domain::{DomainEvent, GridType, MapId, RoomId, UserId};
use vtt_protocol::AssetTransform;

use crate::server::events::{DomainEventRx, EventBus};
use crate::server::services::{
	ChatService, MapAssetService, MapService, RoomAccess, ServiceError, TokenService,
};
use crate::store::{DemoSeed, MemoryStore};

fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

fn seeded() -> (MemoryStore, DemoSeed, DomainEventRx) {
	let bus = EventBus::new(64);
	let store = MemoryStore::new(bus.clone());
	let seed = store.seed_demo().expect("seed");
	(store, seed, bus.subscribe())
}

fn updates(v: Value) -> Map<String, Value> {
	v.as_object().cloned().expect("object")
}

fn only_event(rx: &mut DomainEventRx) -> DomainEvent {
	let ev = rx.try_recv().expect("one event");
	assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)), "more than one event");
	ev
}

fn no_event(rx: &mut DomainEventRx) {
	assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn seed_creates_a_playable_table() {
	let (store, seed, _rx) = seeded();
	assert_eq!(seed.token_ids.len(), 2);
	assert!(store.map(&seed.map_id).is_some());
	assert_eq!(store.asset(&seed.asset_id).and_then(|a| a.map_id), Some(seed.map_id.clone()));
}

#[test]
fn seed_publishes_one_event_per_mutation() {
	let bus = EventBus::new(64);
	let mut rx = bus.subscribe();
	let store = MemoryStore::new(bus);
	store.seed_demo().expect("seed");

	let mut kinds = Vec::new();
	while let Ok(ev) = rx.try_recv() {
		kinds.push(ev.entity().as_str());
	}
	assert_eq!(kinds, vec!["map", "token", "token", "map_asset"]);
}

#[tokio::test]
async fn room_access_rules() {
	let (store, seed, _rx) = seeded();

	assert_eq!(RoomAccess::check_access(&store, &seed.gm, &seed.room_id).await, Ok(()));
	assert_eq!(RoomAccess::check_access(&store, &seed.player, &seed.room_id).await, Ok(()));
	assert!(matches!(
		RoomAccess::check_access(&store, &user("stranger"), &seed.room_id).await,
		Err(ServiceError::Forbidden(_))
	));
	assert!(matches!(
		ChatService::check_access(&store, &seed.gm, &RoomId::new("nope").expect("valid RoomId")).await,
		Err(ServiceError::NotFound(_))
	));
}

#[tokio::test]
async fn map_update_is_gm_only_and_validated() {
	let (store, seed, mut rx) = seeded();

	let err = store
		.update_map(&seed.map_id, updates(json!({"name": "x"})), &seed.player)
		.await
		.expect_err("player is not gm");
	assert!(matches!(err, ServiceError::Forbidden(_)));

	for bad in [
		json!({"gridSize": "big"}),
		json!({"gridSize": 0}),
		json!({"gridType": "TRIANGLE"}),
		json!({"showGrid": 1}),
		json!({"imageScale": -1.0}),
		json!({"name": "ok", "owner": "me"}),
	] {
		let err = store
			.update_map(&seed.map_id, updates(bad.clone()), &seed.gm)
			.await
			.expect_err("invalid update");
		assert!(matches!(err, ServiceError::Validation(_)), "{bad}");
	}
	no_event(&mut rx);
	assert_eq!(store.map(&seed.map_id).and_then(|m| m.name), Some("Demo Map".to_string()));

	let map = store
		.update_map(
			&seed.map_id,
			updates(json!({"gridType": "HEX", "imageUrl": "https://cdn/bg.png", "imageX": -12.5})),
			&seed.gm,
		)
		.await
		.expect("gm update");
	assert_eq!(map.grid_type, GridType::Hex);
	assert_eq!(map.image_url.as_deref(), Some("https://cdn/bg.png"));
	assert_eq!(map.image_x, -12.5);

	match only_event(&mut rx) {
		DomainEvent::MapUpdated { map_id, changes } => {
			assert_eq!(map_id, seed.map_id);
			assert_eq!(changes.len(), 3);
			assert_eq!(changes["gridType"], "HEX");
		}
		other => panic!("unexpected event {other:?}"),
	}
}

#[tokio::test]
async fn token_moves_follow_ownership() {
	let (store, seed, mut rx) = seeded();
	let (hero, goblin) = (&seed.token_ids[0], &seed.token_ids[1]);

	assert!(store.validate_move_access(hero, &seed.player).await.is_ok());
	assert!(matches!(
		store.validate_move_access(goblin, &seed.player).await,
		Err(ServiceError::Forbidden(_))
	));
	assert!(store.validate_move_access(goblin, &seed.gm).await.is_ok());

	let err = store.move_token(goblin, 1.0, 1.0, &seed.player).await.expect_err("not owner");
	assert!(matches!(err, ServiceError::Forbidden(_)));
	no_event(&mut rx);

	let moved = store.move_token(hero, 7.0, 8.0, &seed.player).await.expect("move");
	assert_eq!((moved.x, moved.y), (7.0, 8.0));
	assert!(matches!(only_event(&mut rx), DomainEvent::TokenUpdated { token, .. } if token.id == *hero));
}

#[tokio::test]
async fn deleted_token_is_gone_from_snapshots() {
	let (store, seed, mut rx) = seeded();
	let goblin = seed.token_ids[1].clone();

	assert!(matches!(store.delete_token(&seed.player, &goblin), Err(ServiceError::Forbidden(_))));
	store.delete_token(&seed.gm, &goblin).expect("gm deletes");
	assert!(matches!(only_event(&mut rx), DomainEvent::TokenDeleted { token_id, .. } if token_id == goblin));

	let tokens = store.tokens_for_map(&seed.map_id, &seed.gm).await.expect("tokens");
	assert_eq!(tokens.len(), 1);
	assert!(store.token(&goblin).is_none());
	assert!(matches!(
		store.validate_move_access(&goblin, &seed.gm).await,
		Err(ServiceError::NotFound(_))
	));
}

#[tokio::test]
async fn deleting_a_map_detaches_its_assets() {
	let (store, seed, mut rx) = seeded();

	store.delete_map(&seed.gm, &seed.map_id).expect("delete map");
	assert!(matches!(only_event(&mut rx), DomainEvent::MapDeleted { map_id, .. } if map_id == seed.map_id));

	assert!(store.map(&seed.map_id).is_none());
	assert_eq!(store.asset(&seed.asset_id).map(|a| a.map_id), Some(None));
	assert!(matches!(
		store.get_map_for_user(&seed.map_id, &seed.gm).await,
		Err(ServiceError::NotFound(_))
	));

	store.remove_asset(&seed.asset_id).await.expect("remove detached asset");
	match only_event(&mut rx) {
		ev @ DomainEvent::MapAssetDeleted { map_id: None, .. } => assert!(ev.scope().is_none()),
		other => panic!("unexpected event {other:?}"),
	}
}

#[tokio::test]
async fn asset_update_replaces_transform() {
	let (store, seed, mut rx) = seeded();
	let transform = AssetTransform {
		x: 1.0,
		y: 2.0,
		width: 30.0,
		height: 40.0,
	};

	let asset = store.update_asset(&seed.asset_id, transform).await.expect("update");
	assert_eq!((asset.x, asset.y, asset.width, asset.height), (1.0, 2.0, 30.0, 40.0));
	assert_eq!(asset.url, "/assets/demo/tree.png");
	assert!(matches!(only_event(&mut rx), DomainEvent::MapAssetUpdated { .. }));

	let missing = vtt_domain::AssetId::new("missing").expect("valid AssetId");
	assert!(matches!(
		store.update_asset(&missing, transform).await,
		Err(ServiceError::NotFound(_))
	));
	no_event(&mut rx);
}

#[tokio::test]
async fn messages_are_trimmed_and_blank_ones_rejected() {
	let (store, seed, mut rx) = seeded();

	let err = store
		.create_message(&seed.player, &seed.room_id, "   ")
		.await
		.expect_err("blank");
	assert!(matches!(err, ServiceError::Validation(_)));
	no_event(&mut rx);

	let msg = store
		.create_message(&seed.player, &seed.room_id, "  hi all ")
		.await
		.expect("message");
	assert_eq!(msg.content, "hi all");
	assert_eq!(msg.sender_id, seed.player);
	assert_eq!(store.messages(&seed.room_id), vec![msg.clone()]);
	assert!(matches!(only_event(&mut rx), DomainEvent::MessageCreated { message, .. } if message == msg));
}

#[tokio::test]
async fn create_map_requires_gm() {
	let (store, seed, mut rx) = seeded();
	assert!(matches!(
		store.create_map(&seed.player, &seed.room_id, None),
		Err(ServiceError::Forbidden(_))
	));
	no_event(&mut rx);

	let map = store
		.create_map(&seed.gm, &seed.room_id, Some("Tavern".into()))
		.expect("create map");
	assert!(matches!(only_event(&mut rx), DomainEvent::MapCreated { map: m, .. } if m.id == map.id));
	assert!(store.assets_for_map(&map.id).await.expect("assets").is_empty());
	assert!(
		store
			.assets_for_map(&MapId::new("nope").expect("valid MapId"))
			.await
			.is_err()
	);
}
