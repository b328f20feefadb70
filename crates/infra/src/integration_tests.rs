//! End-to-end flows across the services on the in-memory backend.
//!
//! Bootstrap → staff onboarding → CSV imports → checkout → audit cleanup.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;

use stockroom_auth::Hs256Jwt;
use stockroom_catalog::{CategoryDraft, StoreDraft};
use stockroom_core::{DomainError, FixedClock, PageRequest, RequestContext};
use stockroom_inventory::LotStatus;
use stockroom_sales::{CartItem, CheckoutRequest, OrderQuery};

use crate::db::{Database, InventoryQuery, MemoryDatabase, ProductQuery};
use crate::import::{UploadFormat, parse_inventory_rows, parse_product_rows};
use crate::services::{NewUser, RoleInput, Services, user_summaries};

fn setup() -> (Arc<dyn Database>, Arc<FixedClock>, Services) {
    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 4, 10, 8, 0, 0).unwrap()));
    let tokens = Arc::new(Hs256Jwt::new(b"integration", Duration::hours(2)));
    let services = Services::new(db.clone(), clock.clone(), tokens);
    (db, clock, services)
}

#[tokio::test]
async fn store_day_from_onboarding_to_sale() {
    let (db, clock, services) = setup();
    let ctx = RequestContext::background();

    services
        .identity
        .bootstrap_super_admin(&ctx, "root", "root@shop.test", "rootpass")
        .await
        .unwrap();
    let login = services.identity.login(&ctx, "root", "rootpass").await.unwrap();
    let (root, _) = services.identity.authenticate(&ctx, &login.token).await.unwrap();

    let store = services
        .catalog
        .create_store(&ctx, &root, StoreDraft { name: "Harbor".into(), code: Some("hbr".into()), ..StoreDraft::default() })
        .await
        .unwrap();
    services
        .catalog
        .create_category(&ctx, &root, CategoryDraft { name: "Dairy".into(), category_code: "DRY".into() })
        .await
        .unwrap();
    let cashier_role = services
        .identity
        .create_role(&ctx, &root, RoleInput { name: "cashier".into(), level: 40 })
        .await
        .unwrap();
    let cashier_user = services
        .identity
        .create_user(
            &ctx,
            &root,
            NewUser {
                username: "cara".into(),
                email: "cara@shop.test".into(),
                name: Some("Cara".into()),
                password: "s3cret!".into(),
                role_id: Some(cashier_role.id),
                store_id: Some(store.id),
            },
        )
        .await
        .unwrap();

    let login = services.identity.login(&ctx, "cara@shop.test", "s3cret!").await.unwrap();
    let (cashier, _) = services.identity.authenticate(&ctx, &login.token).await.unwrap();
    assert_eq!(cashier.store_id, Some(store.id));

    let products = parse_product_rows(
        UploadFormat::Csv,
        b"name,category_code,selling_price,purchase_price,sku\n\
          Milk,DRY,1.50,0.90,MILK-1L\n\
          Yogurt,DRY,0.80,0.40,YOG-150\n",
    )
    .unwrap();
    let imported = services.catalog.import_products(&ctx, &cashier, products).await.unwrap();
    assert!(imported.iter().all(|p| p.store_id == store.id));

    let lots = parse_inventory_rows(
        UploadFormat::Csv,
        b"quantity,sku,location,expiry_date\n\
          4,MILK-1L,Fridge A,2026-04-14\n\
          10,MILK-1L,Fridge B,2026-05-30\n\
          6,YOG-150,Fridge A,2026-04-09\n\
          12,YOG-150,Fridge A,\n",
    )
    .unwrap();
    services.ledger.import_lots(&ctx, &cashier, lots).await.unwrap();

    let near = services
        .ledger
        .list_lots(
            &cashier,
            InventoryQuery { statuses: vec![LotStatus::NearExpiry], ..InventoryQuery::default() },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(near.total, 1);
    assert_eq!(near.data[0].sku, "MILK-1L");

    let milk = &imported[0];
    let yogurt = &imported[1];
    let order = services
        .checkout
        .checkout(
            &ctx,
            &cashier,
            CheckoutRequest {
                customer_name: None,
                store_id: None,
                grand_total: dec!(9.10),
                items: vec![
                    CartItem { product_id: milk.id, quantity: dec!(5) },
                    CartItem { product_id: yogurt.id, quantity: dec!(2) },
                ],
            },
        )
        .await
        .unwrap();
    assert_eq!(order.invoice_number, "HBR260410080000");
    assert_eq!(order.total_price, dec!(9.10));

    // the fridge A milk went first; the expired yogurt lot was never touched
    let milk_left = services.ledger.available_quantity(&cashier, milk.id).await.unwrap();
    assert_eq!(milk_left.available, dec!(9));
    let yogurt_left = services.ledger.available_quantity(&cashier, yogurt.id).await.unwrap();
    assert_eq!(yogurt_left.available, dec!(10));
    let yogurt_lots = services
        .ledger
        .list_lots(
            &cashier,
            InventoryQuery { product_id: Some(yogurt.id), ..InventoryQuery::default() },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(yogurt_lots.total, 2);

    clock.advance(Duration::days(30));
    let orders = services
        .checkout
        .list_orders(&cashier, OrderQuery::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(orders.data, vec![order.clone()]);

    let summaries = user_summaries(db.as_ref(), order.created_by).await.unwrap();
    assert_eq!(summaries[&cashier_user.id].name, "Cara");

    services.identity.delete_user(&ctx, &root, cashier_user.id).await.unwrap();
    let stale = services.identity.authenticate(&ctx, &login.token).await.unwrap_err();
    assert!(matches!(stale, DomainError::Authentication(_)));
    let kept = services.checkout.get_order(&root, order.id).await.unwrap();
    assert_eq!(kept.created_by, None);
}

#[tokio::test]
async fn stores_are_isolated_from_each_other() {
    let (_, _, services) = setup();
    let ctx = RequestContext::background();
    services
        .identity
        .bootstrap_super_admin(&ctx, "root", "root@shop.test", "rootpass")
        .await
        .unwrap();
    let login = services.identity.login(&ctx, "root", "rootpass").await.unwrap();
    let (root, _) = services.identity.authenticate(&ctx, &login.token).await.unwrap();

    let north = services
        .catalog
        .create_store(&ctx, &root, StoreDraft { name: "North".into(), code: Some("N1".into()), ..StoreDraft::default() })
        .await
        .unwrap();
    let south = services
        .catalog
        .create_store(&ctx, &root, StoreDraft { name: "South".into(), code: Some("S1".into()), ..StoreDraft::default() })
        .await
        .unwrap();
    services
        .catalog
        .create_category(&ctx, &root, CategoryDraft { name: "Bakery".into(), category_code: "BAK".into() })
        .await
        .unwrap();

    for (store, sku) in [(&north, "N-BREAD"), (&south, "S-BREAD")] {
        let rows = parse_product_rows(
            UploadFormat::Csv,
            format!("name,category_code,selling_price,purchase_price,sku,store_id\nBread,BAK,2,1,{sku},{}\n", store.id)
                .as_bytes(),
        )
        .unwrap();
        services.catalog.import_products(&ctx, &root, rows).await.unwrap();
    }

    let role = services
        .identity
        .create_role(&ctx, &root, RoleInput { name: "clerk".into(), level: 40 })
        .await
        .unwrap();
    services
        .identity
        .create_user(
            &ctx,
            &root,
            NewUser {
                username: "nick".into(),
                email: "nick@shop.test".into(),
                name: None,
                password: "northern".into(),
                role_id: Some(role.id),
                store_id: Some(north.id),
            },
        )
        .await
        .unwrap();
    let login = services.identity.login(&ctx, "nick", "northern").await.unwrap();
    let (clerk, _) = services.identity.authenticate(&ctx, &login.token).await.unwrap();

    let visible = services
        .catalog
        .list_products(&clerk, ProductQuery::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(visible.total, 1);
    assert_eq!(visible.data[0].sku, "N-BREAD");

    let everything = services
        .catalog
        .list_products(&root, ProductQuery::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(everything.total, 2);

    let denied = services
        .catalog
        .list_products(&clerk, ProductQuery { store_id: Some(south.id), ..ProductQuery::default() }, PageRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(denied, DomainError::Forbidden(_)));
}
