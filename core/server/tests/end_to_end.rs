//! Full client/server flows over the in-process remote.

use std::sync::Arc;

use keyhaven_common::Error;
use keyhaven_crypto::kdf::{self, KdfParams, ARGON2_VERSION_13};
use keyhaven_crypto::wrap;
use keyhaven_server::{InProcessRemote, Server};
use keyhaven_sync::{LocalReplica, SyncConfig, SyncReconciler, SyncStatus};
use keyhaven_vault::api::AuthenticateRequest;
use keyhaven_vault::{
    ClientProfile, ItemPayload, LoginData, PasswordRotation, Registration, SecureNoteData,
    VaultSession,
};

fn fast_params() -> KdfParams {
    KdfParams {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
        version: ARGON2_VERSION_13,
    }
}

struct Client {
    profile: ClientProfile,
    session: VaultSession,
    replica: LocalReplica,
    reconciler: SyncReconciler<InProcessRemote>,
}

async fn login(server: &Arc<Server>, profile: &ClientProfile, secret: &[u8]) -> Result<String, Error> {
    let derived = kdf::derive(secret, &profile.salt, &profile.kdf_params)?;
    let response = server
        .identity()
        .authenticate(AuthenticateRequest {
            email: profile.email.clone(),
            verifier: derived.verifier.clone(),
        })
        .await?;
    Ok(response.token)
}

async fn register(server: &Arc<Server>, email: &str, secret: &[u8]) -> Client {
    let registration = Registration::create(email, secret, None, fast_params()).unwrap();
    let response = server
        .identity()
        .register(registration.request().clone())
        .await
        .unwrap();
    let profile = ClientProfile::from_registration(registration.request(), &response);
    connect(server, profile, secret).await
}

async fn connect(server: &Arc<Server>, profile: ClientProfile, secret: &[u8]) -> Client {
    let token = login(server, &profile, secret).await.unwrap();
    let session = VaultSession::unlock(&profile, secret).unwrap();
    Client {
        profile,
        session,
        replica: LocalReplica::new(),
        reconciler: SyncReconciler::new(server.connect(token), SyncConfig::default()),
    }
}

fn login_payload(name: &str) -> ItemPayload {
    ItemPayload::Login(LoginData {
        name: name.to_string(),
        username: Some("alice".to_string()),
        password: Some("hunter2".to_string()),
        uris: vec!["https://example.com".to_string()],
        ..Default::default()
    })
}

#[tokio::test]
async fn test_create_then_sync_from_scratch() {
    let server = Arc::new(Server::in_memory());
    let mut client = register(&server, "alice@example.com", b"P1").await;

    let item = client.session.seal_item(&login_payload("A")).unwrap();
    client.replica.stage_create(item.clone()).unwrap();
    client.reconciler.push_pending(&mut client.replica).await.unwrap();

    let response = client.reconciler.incremental_sync(None).await.unwrap();
    assert_eq!(response.ids, vec![item.id]);
    assert_eq!(response.items.len(), 1);
    assert_eq!(response.items[0].id, item.id);

    let opened = client.session.open_item(&response.items[0]).unwrap();
    assert_eq!(opened, login_payload("A"));
}

#[tokio::test]
async fn test_rotation_keeps_items_readable() {
    let server = Arc::new(Server::in_memory());
    let mut client = register(&server, "alice@example.com", b"P1").await;

    let item = client.session.seal_item(&login_payload("A")).unwrap();
    client.replica.stage_create(item.clone()).unwrap();
    client.reconciler.synchronize(&mut client.replica).await.unwrap();
    let before = server
        .items()
        .get(client.profile.identity_id, &item.id)
        .await
        .unwrap();

    let old_derived = kdf::derive(b"P1", &client.profile.salt, &client.profile.kdf_params).unwrap();
    let rotation = PasswordRotation::prepare(&client.profile, b"P1", b"P2", None).unwrap();
    let response = server
        .identity()
        .change_password(client.profile.identity_id, rotation.request().clone())
        .await
        .unwrap();
    rotation.commit(&mut client.profile, response);

    // P1 no longer authenticates, P2 does.
    let stale = server
        .identity()
        .authenticate(AuthenticateRequest {
            email: client.profile.email.clone(),
            verifier: old_derived.verifier.clone(),
        })
        .await;
    assert!(matches!(stale, Err(Error::Authentication)));
    assert!(login(&server, &client.profile, b"P1").await.is_err());
    let token = login(&server, &client.profile, b"P2").await.unwrap();

    // The old session's token was revoked.
    assert!(matches!(
        client.reconciler.incremental_sync(None).await,
        Err(Error::Authentication)
    ));

    // Ciphertext on the server is untouched.
    let after = server
        .items()
        .get(client.profile.identity_id, &item.id)
        .await
        .unwrap();
    assert_eq!(before.ciphertext, after.ciphertext);
    assert_eq!(before.last_modified, after.last_modified);

    // A fresh device unlocks with P2 from the server's secrets and reads A.
    let secrets = server
        .identity()
        .secrets(client.profile.identity_id)
        .await
        .unwrap();
    let mut fresh = client.profile.clone();
    fresh.apply_secrets(secrets);
    assert!(VaultSession::unlock(&fresh, b"P1").is_err());
    let session = VaultSession::unlock(&fresh, b"P2").unwrap();

    let reconciler = SyncReconciler::new(server.connect(token), SyncConfig::default());
    let mut replica = LocalReplica::new();
    reconciler.sync(&mut replica).await.unwrap();
    let synced = replica.get(&item.id).unwrap();
    assert_eq!(session.open_item(synced).unwrap(), login_payload("A"));
}

#[tokio::test]
async fn test_delete_propagates_to_other_device() {
    let server = Arc::new(Server::in_memory());
    let mut laptop = register(&server, "alice@example.com", b"P1").await;
    let mut phone = connect(&server, laptop.profile.clone(), b"P1").await;

    let item = laptop.session.seal_item(&login_payload("A")).unwrap();
    laptop.replica.stage_create(item.clone()).unwrap();
    laptop.reconciler.synchronize(&mut laptop.replica).await.unwrap();

    phone.reconciler.sync(&mut phone.replica).await.unwrap();
    assert!(phone.replica.get(&item.id).is_some());

    laptop.replica.stage_delete(&item.id).unwrap();
    let (pushed, _) = laptop.reconciler.synchronize(&mut laptop.replica).await.unwrap();
    assert_eq!(pushed.deleted, 1);

    let merged = phone.reconciler.sync(&mut phone.replica).await.unwrap();
    assert_eq!(merged.deleted, 1);
    assert!(phone.replica.get(&item.id).is_none());
    assert!(phone.replica.is_empty());
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let server = Arc::new(Server::in_memory());
    let mut client = register(&server, "alice@example.com", b"P1").await;

    for name in ["A", "B", "C"] {
        let item = client.session.seal_item(&login_payload(name)).unwrap();
        client.replica.stage_create(item).unwrap();
    }
    client.reconciler.synchronize(&mut client.replica).await.unwrap();
    let snapshot = client.replica.items().into_iter().cloned().collect::<Vec<_>>();

    let again = client.reconciler.sync(&mut client.replica).await.unwrap();
    assert_eq!(again.created + again.updated + again.deleted, 0);
    assert!(again.conflicts.is_empty());
    let after = client.replica.items().into_iter().cloned().collect::<Vec<_>>();
    assert_eq!(snapshot, after);
    assert!(client.replica.pending().is_empty());
}

#[tokio::test]
async fn test_remote_edit_wins_over_pending_local_edit() {
    let server = Arc::new(Server::in_memory());
    let mut laptop = register(&server, "alice@example.com", b"P1").await;
    let mut phone = connect(&server, laptop.profile.clone(), b"P1").await;

    let item = laptop.session.seal_item(&login_payload("A")).unwrap();
    laptop.replica.stage_create(item.clone()).unwrap();
    laptop.reconciler.synchronize(&mut laptop.replica).await.unwrap();
    phone.reconciler.sync(&mut phone.replica).await.unwrap();

    // Phone edits and pushes first.
    let current = phone.replica.get(&item.id).unwrap().clone();
    let phone_edit = phone
        .session
        .reseal_item(&current, &login_payload("from phone"))
        .unwrap();
    phone.replica.stage_update(phone_edit).unwrap();
    phone.reconciler.synchronize(&mut phone.replica).await.unwrap();

    // Laptop edits locally but syncs before pushing.
    let current = laptop.replica.get(&item.id).unwrap().clone();
    let laptop_edit = laptop
        .session
        .reseal_item(&current, &login_payload("from laptop"))
        .unwrap();
    laptop.replica.stage_update(laptop_edit).unwrap();
    let merged = laptop.reconciler.sync(&mut laptop.replica).await.unwrap();

    assert_eq!(merged.conflicts.len(), 1);
    assert_eq!(merged.conflicts[0].item_id, item.id);
    let entry = laptop.replica.entry(&item.id).unwrap();
    assert_eq!(entry.status, SyncStatus::Synced);
    assert_eq!(
        laptop.session.open_item(&entry.item).unwrap(),
        login_payload("from phone")
    );
}

#[tokio::test]
async fn test_server_state_cannot_unwrap_vault_key() {
    let server = Arc::new(Server::in_memory());
    let registration =
        Registration::create("alice@example.com", b"P1", None, fast_params()).unwrap();
    let request = registration.request().clone();
    let response = server.identity().register(request.clone()).await.unwrap();
    let secrets = server.identity().secrets(response.id).await.unwrap();

    // Everything the server holds, used as a key-encryption key.
    let verifier_as_key = wrap::unwrap(&secrets.wrapped_vault_key, request.verifier.as_bytes());
    let digest_as_key = wrap::unwrap(
        &secrets.wrapped_vault_key,
        request.verifier.digest().as_bytes(),
    );
    let salt_as_key = wrap::unwrap(&secrets.wrapped_vault_key, secrets.salt.as_bytes());
    assert!(matches!(verifier_as_key, Err(Error::Crypto(_))));
    assert!(matches!(digest_as_key, Err(Error::Crypto(_))));
    assert!(matches!(salt_as_key, Err(Error::Crypto(_))));

    // Only the client-derived local key works.
    let derived = kdf::derive(b"P1", &secrets.salt, &secrets.kdf_params).unwrap();
    let vault_key = wrap::unwrap_vault_key(&secrets.wrapped_vault_key, &derived.local_key).unwrap();
    assert_eq!(vault_key.as_bytes(), registration.vault_key().as_bytes());
}

#[tokio::test]
async fn test_concurrent_rotation_loser_is_rejected() {
    let server = Arc::new(Server::in_memory());
    let client = register(&server, "alice@example.com", b"P1").await;

    let first = PasswordRotation::prepare(&client.profile, b"P1", b"P2", None).unwrap();
    let second = PasswordRotation::prepare(&client.profile, b"P1", b"P3", None).unwrap();
    let id = client.profile.identity_id;

    let (a, b) = tokio::join!(
        server.identity().change_password(id, first.request().clone()),
        server.identity().change_password(id, second.request().clone()),
    );
    assert!(a.is_ok() != b.is_ok(), "exactly one rotation must win");

    let winner = if a.is_ok() { b"P2" } else { b"P3" };
    let loser = if a.is_ok() { b"P3" } else { b"P2" };
    let secrets = server.identity().secrets(id).await.unwrap();
    let mut profile = client.profile.clone();
    profile.apply_secrets(secrets);
    assert!(VaultSession::unlock(&profile, winner).is_ok());
    assert!(VaultSession::unlock(&profile, loser).is_err());
}

#[tokio::test]
async fn test_other_identity_items_are_invisible() {
    let server = Arc::new(Server::in_memory());
    let mut alice = register(&server, "alice@example.com", b"P1").await;
    let mut bob = register(&server, "bob@example.com", b"Q1").await;

    let note = ItemPayload::SecureNote(SecureNoteData {
        title: "wifi".to_string(),
        note: "correct horse".to_string(),
    });
    let item = alice.session.seal_item(&note).unwrap();
    alice.replica.stage_create(item.clone()).unwrap();
    alice.reconciler.synchronize(&mut alice.replica).await.unwrap();

    bob.reconciler.sync(&mut bob.replica).await.unwrap();
    assert!(bob.replica.is_empty());

    // Bob cannot decrypt Alice's ciphertext even if he gets hold of it.
    assert!(bob.session.open_item(&item).is_err());
}
