//! Integration tests for inventory reservations under concurrent sagas.

use std::sync::Arc;
use std::time::Duration;

use common::{ProductId, SagaId};
use coordination::LeaseMutex;
use domain::{DomainError, InventoryService, ReservationStatus};
use outbox::InMemoryOutboxStore;

async fn stocked(total: u32) -> (InventoryService<LeaseMutex>, ProductId) {
    let service = InventoryService::new(LeaseMutex::default(), InMemoryOutboxStore::new());
    let product_id = ProductId::new("SKU-001");
    service
        .register_product(product_id.clone(), total)
        .await
        .unwrap();
    (service, product_id)
}

mod semantic_lock {
    use super::*;

    #[tokio::test]
    async fn lock_blocks_other_saga_until_cancelled() {
        let (service, product) = stocked(10).await;
        let s1 = SagaId::new("SAGA-S1");
        let s2 = SagaId::new("SAGA-S2");

        let record = service.reserve(&product, 2, &s1).await.unwrap();
        assert_eq!(record.available_quantity(), 8);
        assert_eq!(record.status, ReservationStatus::Reserved);

        let err = service.reserve(&product, 1, &s2).await.unwrap_err();
        assert!(matches!(err, DomainError::LockedByOtherSaga { .. }));

        let record = service.cancel(&product, 2, &s1).await.unwrap();
        assert_eq!(record.status, ReservationStatus::Available);
        assert_eq!(record.reserved_quantity, 0);

        let record = service.reserve(&product, 1, &s2).await.unwrap();
        assert_eq!(record.owner_saga_id, Some(s2));
    }

    #[tokio::test]
    async fn other_saga_cannot_settle_reservation() {
        let (service, product) = stocked(10).await;
        let owner = SagaId::new("SAGA-A");
        let intruder = SagaId::new("SAGA-B");
        service.reserve(&product, 3, &owner).await.unwrap();

        let err = service.confirm(&product, 3, &intruder).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidOwnership { .. }));
        let err = service.cancel(&product, 3, &intruder).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidOwnership { .. }));

        let record = service.get(&product).await.unwrap();
        assert_eq!(record.reserved_quantity, 3);
        assert_eq!(record.owner_saga_id, Some(owner));
    }

    #[tokio::test]
    async fn confirm_sells_reserved_stock() {
        let (service, product) = stocked(10).await;
        let saga = SagaId::new("SAGA-A");
        service.reserve(&product, 4, &saga).await.unwrap();

        let record = service.confirm(&product, 4, &saga).await.unwrap();
        assert_eq!(record.total_quantity, 6);
        assert_eq!(record.reserved_quantity, 0);
        assert_eq!(record.status, ReservationStatus::Available);

        let again = service.confirm(&product, 4, &saga).await.unwrap();
        assert_eq!(again.total_quantity, 6);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sagas_one_wins_other_sees_lock() {
        let (service, product) = stocked(10).await;
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for i in 0..2 {
            let service = Arc::clone(&service);
            let product = product.clone();
            handles.push(tokio::spawn(async move {
                service
                    .reserve(&product, 3, &SagaId::new(format!("SAGA-{i}")))
                    .await
            }));
        }

        let mut won = 0;
        let mut locked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(DomainError::LockedByOtherSaga { .. }) => locked += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((won, locked), (1, 1));
        assert_eq!(service.get(&product).await.unwrap().reserved_quantity, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reserve_confirm_cycles_keep_invariants() {
        let (service, product) = stocked(100).await;
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for i in 0..20 {
            let service = Arc::clone(&service);
            let product = product.clone();
            handles.push(tokio::spawn(async move {
                let saga = SagaId::new(format!("SAGA-{i}"));
                loop {
                    match service.reserve(&product, 1, &saga).await {
                        Ok(_) => break,
                        Err(DomainError::LockedByOtherSaga { .. }) => {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
                let record = service.confirm(&product, 1, &saga).await.unwrap();
                assert!(record.reserved_quantity <= record.total_quantity);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = service.get(&product).await.unwrap();
        assert_eq!(record.total_quantity, 80);
        assert_eq!(record.reserved_quantity, 0);
        assert_eq!(record.status, ReservationStatus::Available);
        assert_eq!(record.version, 40);
    }
}

mod saga_holds {
    use super::*;

    #[tokio::test]
    async fn cancel_after_confirm_restocks_despite_later_sales() {
        let (service, product) = stocked(100).await;
        let saga = SagaId::new("SAGA-A");
        service.reserve(&product, 2, &saga).await.unwrap();
        service.confirm(&product, 2, &saga).await.unwrap();

        for i in 0..80 {
            let other = SagaId::new(format!("SAGA-{i}"));
            service.reserve(&product, 1, &other).await.unwrap();
            service.confirm(&product, 1, &other).await.unwrap();
        }
        assert_eq!(service.get(&product).await.unwrap().total_quantity, 18);

        let record = service.cancel(&product, 2, &saga).await.unwrap();
        assert_eq!(record.total_quantity, 20);

        let again = service.cancel(&product, 2, &saga).await.unwrap();
        assert_eq!(again.total_quantity, 20);
        assert_eq!(again.version, record.version);
    }

    #[tokio::test]
    async fn cancel_without_reservation_fails_loudly() {
        let (service, product) = stocked(10).await;

        let err = service
            .cancel(&product, 2, &SagaId::new("SAGA-GHOST"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "RESERVATION_NOT_FOUND");
        assert_eq!(service.get(&product).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn released_hold_is_gone_from_the_record() {
        let (service, product) = stocked(10).await;
        let saga = SagaId::new("SAGA-A");
        service.reserve(&product, 2, &saga).await.unwrap();
        service.confirm(&product, 2, &saga).await.unwrap();

        let record = service.release_hold(&product, &saga).await.unwrap();
        assert_eq!(record.hold(&saga), None);
        assert_eq!(record.hold_count(), 0);

        let unchanged = service.release_hold(&product, &saga).await.unwrap();
        assert_eq!(unchanged.version, record.version);
        assert_eq!(service.outbox().record_count().await, 3);
    }
}

mod outbox_events {
    use super::*;

    #[tokio::test]
    async fn every_change_has_exactly_one_event() {
        let (service, product) = stocked(10).await;
        let saga = SagaId::new("SAGA-A");

        service.reserve(&product, 2, &saga).await.unwrap();
        service.reserve(&product, 2, &saga).await.unwrap();
        service.cancel(&product, 2, &saga).await.unwrap();
        let _ = service.reserve(&product, 50, &SagaId::new("SAGA-B")).await;

        let types: Vec<String> = service
            .outbox()
            .records_for(product.as_str())
            .await
            .into_iter()
            .map(|r| r.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                "ProductRegistered",
                "StockReserved",
                "StockReservationCancelled"
            ]
        );
        assert_eq!(service.get(&product).await.unwrap().version, 2);
    }
}
