use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

use stockroom_api::config::{AppConfig, BootstrapAdmin};
use stockroom_auth::JwtClaims;
use stockroom_core::UserId;

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const JWT_SECRET: &str = "test-secret";
const ADMIN_PASSWORD: &str = "root-password-1";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod on the in-memory backend, bound to an ephemeral port.
        let config = AppConfig {
            jwt_secret: JWT_SECRET.to_string(),
            bootstrap_admin: Some(BootstrapAdmin {
                username: "root".to_string(),
                email: "root@example.com".to_string(),
                password: ADMIN_PASSWORD.to_string(),
            }),
            ..AppConfig::default()
        };
        let app = stockroom_api::app::build_app(&config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let res = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "usernameOrEmail": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn upload(&self, token: &str, path: &str, filename: &str, mime: &str, bytes: &[u8]) -> (StatusCode, Value) {
        let part = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str(mime)
            .unwrap();
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Shop {
    store_id: String,
    category_id: String,
    staff_token: String,
}

/// A store with code HBR, a DAIRY category and a logged-in staff user.
async fn open_shop(srv: &TestServer, admin: &str) -> Shop {
    let (status, store) = srv
        .post(admin, "/stores", json!({ "name": "Harbour", "code": "hbr" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(store["code"], "HBR");

    let (status, category) = srv
        .post(admin, "/categories", json!({ "name": "Dairy", "category_code": "dairy" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, role) = srv
        .post(admin, "/roles", json!({ "name": "cashier", "level": 40 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = srv
        .post(
            admin,
            "/users",
            json!({
                "username": "cashier",
                "email": "cashier@example.com",
                "password": "till-password-1",
                "role_id": role["id"],
                "store_id": store["id"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    Shop {
        store_id: store["id"].as_str().unwrap().to_string(),
        category_id: category["id"].as_str().unwrap().to_string(),
        staff_token: srv.login("cashier@example.com", "till-password-1").await,
    }
}

fn mint_jwt(sub: UserId) -> String {
    let claims = JwtClaims::new(sub, Utc::now(), ChronoDuration::minutes(10));
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/auth/me")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn well_signed_token_for_unknown_user_is_rejected() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(UserId::new());

    let (status, body) = srv.get(&token, "/auth/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let srv = TestServer::spawn().await;
    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({ "usernameOrEmail": "root", "password": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_reports_role_level() {
    let srv = TestServer::spawn().await;
    let token = srv.login("root", ADMIN_PASSWORD).await;

    let (status, body) = srv.get(&token, "/auth/me").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "root");
    assert_eq!(body["level"], 99);
}

#[tokio::test]
async fn request_id_is_echoed() {
    let srv = TestServer::spawn().await;
    let id = "0190c3a4-7b1e-7cc0-a2d4-7f5d8e0b9a11";

    let res = srv
        .client
        .get(srv.url("/health"))
        .header("x-request-id", id)
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], id);

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn sale_depletes_stock_and_lists_with_creator() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("root", ADMIN_PASSWORD).await;
    let shop = open_shop(&srv, &admin).await;

    let (status, product) = srv
        .post(
            &shop.staff_token,
            "/products",
            json!({
                "name": "Yoghurt",
                "category_id": shop.category_id,
                "selling_price": 4.55,
                "purchase_price": 3.0,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(product["store_id"], shop.store_id.as_str());
    assert!(product["sku"].as_str().unwrap().starts_with("HBR-DAIRY-"));
    let product_id = product["id"].as_str().unwrap().to_string();

    let expiry = (Utc::now() + ChronoDuration::days(60)).format("%Y-%m-%d").to_string();
    let (status, lot) = srv
        .post(
            &shop.staff_token,
            "/inventory",
            json!({ "product_id": product_id, "quantity": 10, "expiry_date": expiry }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(lot["status"], "active");

    // 2 x 4.55 = 9.10; 9.50 is outside tolerance.
    let (status, body) = srv
        .post(
            &shop.staff_token,
            "/orders/checkout",
            json!({ "grand_total": 9.5, "items": [{ "product_id": product_id, "quantity": 2 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, order) = srv
        .post(
            &shop.staff_token,
            "/orders/checkout",
            json!({
                "customer_name": "Walk-in",
                "grand_total": 9.1,
                "items": [{ "product_id": product_id, "quantity": 2 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(order["invoice_number"].as_str().unwrap().starts_with("HBR"));
    assert_eq!(order["total_price"].as_f64(), Some(9.1));
    assert_eq!(order["lines"].as_array().unwrap().len(), 1);

    let (status, available) = srv
        .get(&shop.staff_token, &format!("/inventory/available/{product_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(available["available"].as_f64(), Some(8.0));

    let (status, orders) = srv.get(&shop.staff_token, "/orders?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders["total"], 1);
    assert_eq!(orders["limit"], 5);
    assert_eq!(orders["data"][0]["created_by"]["email"], "cashier@example.com");

    // Too much asked for: rejected, nothing consumed.
    let (status, _) = srv
        .post(
            &shop.staff_token,
            "/orders/checkout",
            json!({ "grand_total": 45.5, "items": [{ "product_id": product_id, "quantity": 10 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, available) = srv
        .get(&shop.staff_token, &format!("/inventory/available/{product_id}"))
        .await;
    assert_eq!(available["available"].as_f64(), Some(8.0));
}

#[tokio::test]
async fn staff_cannot_manage_stores() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("root", ADMIN_PASSWORD).await;
    let shop = open_shop(&srv, &admin).await;

    let res = srv
        .client
        .put(srv.url(&format!("/stores/{}", shop.store_id)))
        .bearer_auth(&shop.staff_token)
        .json(&json!({ "name": "Renamed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let (status, _) = srv.get(&shop.staff_token, &format!("/stores/{}", shop.store_id)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_ids_and_bodies_are_bad_requests() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("root", ADMIN_PASSWORD).await;

    let (status, body) = srv.get(&admin, "/products/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = srv.post(&admin, "/stores", json!({ "address": "no name" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn sheet_batches_land_whole() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("root", ADMIN_PASSWORD).await;
    let shop = open_shop(&srv, &admin).await;

    let products = "name,category_code,selling_price,purchase_price,sku\n\
                    Milk,dairy,1.20,0.80,MILK-1\n\
                    Butter,dairy,3.40,2.10,BUTTER-1\n";
    let (status, body) = srv
        .upload(&shop.staff_token, "/products/batch", "products.csv", "text/csv", products.as_bytes())
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["count"], 2);

    let lots = "sku,quantity,expiry_date,location\n\
                MILK-1,12,2099-01-01,fridge\n\
                BUTTER-1,4,,\n";
    let (status, body) = srv
        .upload(&shop.staff_token, "/inventory/batch", "lots.csv", "text/csv", lots.as_bytes())
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["count"], 2);

    // One bad row fails the whole batch.
    let broken = "name,category_code,selling_price,purchase_price\n\
                  Cream,dairy,2.00,1.00\n\
                  Cheese,dairy,abc,1.00\n";
    let (status, body) = srv
        .upload(&shop.staff_token, "/products/batch", "more.csv", "text/csv", broken.as_bytes())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], "row 2.selling_price");

    let (_, listed) = srv.get(&shop.staff_token, "/products").await;
    assert_eq!(listed["total"], 2);

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["name", "category_code", "selling_price", "purchase_price", "sku"].iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    sheet.write_string(1, 0, "Yogurt").unwrap();
    sheet.write_string(1, 1, "dairy").unwrap();
    sheet.write_number(1, 2, 0.95).unwrap();
    sheet.write_number(1, 3, 0.5).unwrap();
    sheet.write_string(1, 4, "YOG-1").unwrap();
    let xlsx = workbook.save_to_buffer().unwrap();
    let (status, body) = srv
        .upload(&shop.staff_token, "/products/batch", "products.xlsx", XLSX_MIME, &xlsx)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["sku"], "YOG-1");
    assert_eq!(body["data"][0]["selling_price"].as_f64(), Some(0.95));

    let (_, listed) = srv.get(&shop.staff_token, "/products").await;
    assert_eq!(listed["total"], 3);

    let (status, body) = srv
        .upload(&shop.staff_token, "/products/batch", "broken.xlsx", XLSX_MIME, b"PK\x03\x04")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("XLSX"));

    let (status, _) = srv
        .upload(&shop.staff_token, "/products/batch", "products.xls", "application/vnd.ms-excel", b"")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
