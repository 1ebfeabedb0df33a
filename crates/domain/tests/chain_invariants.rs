//! Version-chain invariants exercised through the public service API.

use std::collections::HashSet;
use std::sync::Arc;

use domain::models::{ChangeContext, CreateConfigurationRequest, RollbackRequest, UpdateConfigurationRequest};
use domain::repository::{ConfigurationRepository, InMemoryConfigurationRepository};
use domain::services::{ConfigurationEngineSettings, ConfigurationService};
use domain::ErrorKind;
use fake::{Fake, Faker};
use serde_json::json;
use uuid::Uuid;

fn actor() -> ChangeContext {
    let id: Uuid = Faker.fake();
    ChangeContext::new(id)
}

fn service() -> (Arc<InMemoryConfigurationRepository>, ConfigurationService) {
    let repo = Arc::new(InMemoryConfigurationRepository::new());
    let service = ConfigurationService::new(repo.clone(), ConfigurationEngineSettings::default());
    (repo, service)
}

fn create_request(value: serde_json::Value) -> CreateConfigurationRequest {
    CreateConfigurationRequest {
        config_key: "inventory.reorder_point".to_string(),
        scope: "branch".to_string(),
        scope_id: Some("b-7".to_string()),
        category: "inventory".to_string(),
        config_value: value,
        schema: None,
        description: None,
        valid_from: None,
        valid_until: None,
        metadata: None,
        change_reason: None,
    }
}

fn value_update(value: serde_json::Value) -> UpdateConfigurationRequest {
    UpdateConfigurationRequest {
        config_value: Some(value),
        ..Default::default()
    }
}

fn rollback_to(version: i32) -> RollbackRequest {
    RollbackRequest {
        config_key: "inventory.reorder_point".to_string(),
        scope: "branch".to_string(),
        scope_id: Some("b-7".to_string()),
        target_version: version,
        change_reason: None,
    }
}

async fn assert_chain_invariants(repo: &InMemoryConfigurationRepository) {
    let chain = ConfigurationService::parse_chain("inventory.reorder_point", "branch", Some("b-7".into())).unwrap();
    let rows = repo.find_chain(&chain).await.unwrap();

    let active = rows.iter().filter(|r| r.is_active).count();
    assert_eq!(active, 1, "exactly one active row expected");

    let versions: Vec<i32> = rows.iter().map(|r| r.version).collect();
    let unique: HashSet<i32> = versions.iter().copied().collect();
    assert_eq!(unique.len(), versions.len(), "versions must be unique: {versions:?}");
    assert!(versions.windows(2).all(|w| w[0] > w[1]), "versions must be ordered: {versions:?}");

    let newest = &rows[0];
    assert!(newest.is_active, "newest version must be the active one");
}

#[tokio::test]
async fn test_mixed_sequence_keeps_single_active_row() {
    let (repo, service) = service();
    let change = actor();

    let mut current = service.create(create_request(json!({"units": 10})), &change).await.unwrap();
    for units in [12, 15, 9] {
        current = service
            .update(current.id, value_update(json!({"units": units})), &change)
            .await
            .unwrap();
        assert_chain_invariants(&repo).await;
    }

    let restored = service.rollback(rollback_to(2), &change).await.unwrap();
    assert_eq!(restored.version, 5);
    assert_eq!(restored.config_value.to_json(), json!({"units": 12}));
    assert_chain_invariants(&repo).await;

    let restored = service.rollback(rollback_to(1), &change).await.unwrap();
    assert_eq!(restored.version, 6);
    assert_chain_invariants(&repo).await;
}

#[tokio::test]
async fn test_rollback_scenario_from_rate_change() {
    let repo = Arc::new(InMemoryConfigurationRepository::new());
    let service = ConfigurationService::new(repo.clone(), ConfigurationEngineSettings::default());
    let change = actor();

    let mut request = create_request(json!({"rate": 19}));
    request.config_key = "tax.vat.rate".to_string();
    request.scope = "system".to_string();
    request.scope_id = None;
    request.category = "tax".to_string();
    let v1 = service.create(request, &change).await.unwrap();
    let v2 = service.update(v1.id, value_update(json!({"rate": 21})), &change).await.unwrap();
    assert_eq!(v2.version, 2);

    let v3 = service
        .rollback(
            RollbackRequest {
                config_key: "tax.vat.rate".to_string(),
                scope: "system".to_string(),
                scope_id: None,
                target_version: 1,
                change_reason: Some("back to standard rate".into()),
            },
            &change,
        )
        .await
        .unwrap();
    assert_eq!(v3.version, 3);
    assert_eq!(v3.config_value.to_json(), json!({"rate": 19}));
}

#[tokio::test]
async fn test_rollback_rejects_current_or_future_versions() {
    let (_repo, service) = service();
    let change = actor();
    let v1 = service.create(create_request(json!(1)), &change).await.unwrap();
    service.update(v1.id, value_update(json!(2)), &change).await.unwrap();

    for target in [2, 3] {
        let err = service.rollback(rollback_to(target), &change).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RollbackIneligible);
    }
}

#[tokio::test]
async fn test_rollback_to_cleaned_up_version_is_ineligible() {
    let (_repo, service) = service();
    let change = actor();
    let v1 = service.create(create_request(json!(1)), &change).await.unwrap();
    let v2 = service.update(v1.id, value_update(json!(2)), &change).await.unwrap();
    service.update(v2.id, value_update(json!(3)), &change).await.unwrap();

    let deleted = service.cleanup_old_versions(&v1.chain(), 2, &change).await.unwrap();
    assert_eq!(deleted, 1);

    let err = service.rollback(rollback_to(1), &change).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RollbackIneligible);
    assert!(service.rollback(rollback_to(2), &change).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_never_produce_two_active_rows() {
    let (repo, service) = service();
    let change = actor();
    let v1 = service.create(create_request(json!({"units": 0})), &change).await.unwrap();

    let mut handles = Vec::new();
    for n in 1..=16 {
        let service = service.clone();
        let change = actor();
        let id = v1.id;
        handles.push(tokio::spawn(async move {
            service.update(id, value_update(json!({"units": n})), &change).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict, "unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 1, "only one writer can replace version 1");
    assert_chain_invariants(&repo).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retrying_writers_build_a_linear_chain() {
    let (repo, service) = service();
    let change = actor();
    service.create(create_request(json!({"units": 0})), &change).await.unwrap();
    let chain = ConfigurationService::parse_chain("inventory.reorder_point", "branch", Some("b-7".into())).unwrap();

    let mut handles = Vec::new();
    for n in 1..=8 {
        let service = service.clone();
        let repo = repo.clone();
        let chain = chain.clone();
        let change = actor();
        handles.push(tokio::spawn(async move {
            loop {
                let current = repo.find_active(&chain).await.unwrap().unwrap();
                match service.update(current.id, value_update(json!({"units": n})), &change).await {
                    Ok(row) => return row.version,
                    Err(e) if e.kind() == ErrorKind::Conflict => tokio::task::yield_now().await,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }));
    }

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap());
    }
    versions.sort();
    assert_eq!(versions, (2..=9).collect::<Vec<i32>>());
    assert_chain_invariants(&repo).await;
}
