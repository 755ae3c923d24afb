use crate::error::AppError;
use crate::middlewares::auth::AuthContext;
use crate::models::Entitlement;
use crate::services::EntitlementService;
use crate::store::DirectoryStore;
use actix_web::http::Method;
use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use chrono::Utc;
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::rc::Rc;
use std::sync::Arc;

/// 订阅闸门（RequestGate）。
///
/// 每个认证请求解析一次权益并塞进请求扩展，下游 handler 与
/// FeatureGate 都只消费这一份决策：
/// - 变更类请求（非 GET）要求 active / pending / 未过期的 grace_period，
///   否则 403，带区分 expired 与 payment_pending 的原因码；
/// - GET 永远放行（只读降级模式），但学校必须有可解析的学年上下文，
///   缺失是与计费无关的硬 400。
///
/// 计费自身的路由豁免：订阅过期的学校必须还能访问续费接口。
struct ExemptPaths {
    prefix_paths: Vec<&'static str>,
}

impl ExemptPaths {
    fn new() -> Self {
        Self {
            prefix_paths: vec!["/api/v1/subscription"],
        }
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.prefix_paths
            .iter()
            .any(|&prefix| path.starts_with(prefix))
    }
}

pub struct EntitlementGate {
    entitlements: EntitlementService,
    directory: Arc<dyn DirectoryStore>,
}

impl EntitlementGate {
    pub fn new(entitlements: EntitlementService, directory: Arc<dyn DirectoryStore>) -> Self {
        Self {
            entitlements,
            directory,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for EntitlementGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = EntitlementGateService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(EntitlementGateService {
            service: Rc::new(service),
            entitlements: self.entitlements.clone(),
            directory: self.directory.clone(),
            exempt_paths: ExemptPaths::new(),
        }))
    }
}

pub struct EntitlementGateService<S> {
    service: Rc<S>,
    entitlements: EntitlementService,
    directory: Arc<dyn DirectoryStore>,
    exempt_paths: ExemptPaths,
}

impl<S, B> Service<ServiceRequest> for EntitlementGateService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        if req.method() == Method::OPTIONS || self.exempt_paths.is_exempt(req.path()) {
            return Box::pin(async move { service.call(req).await });
        }

        let entitlements = self.entitlements.clone();
        let directory = self.directory.clone();

        Box::pin(async move {
            let Some(ctx) = req.extensions().get::<AuthContext>().cloned() else {
                return Err(AppError::AuthError("Missing auth context".to_string()).into());
            };

            let now = Utc::now();

            // 学年上下文与计费状态无关，缺失一律 400
            let school = directory.school(ctx.school_id).await?;
            let Some(school) = school else {
                return Err(AppError::NotFound(format!("School {}", ctx.school_id)).into());
            };
            if school.active_academic_year.is_none() {
                return Err(AppError::NoAcademicYear(ctx.school_id).into());
            }

            let entitlement = entitlements.resolve(ctx.school_id, now).await?;

            if req.method() != Method::GET
                && let Err(reason) = entitlement.check_mutation()
            {
                return Err(AppError::EntitlementError(reason).into());
            }

            req.extensions_mut().insert(entitlement);
            service.call(req).await
        })
    }
}

/// handler 侧取出闸门已解析好的权益
pub fn get_entitlement(req: &actix_web::HttpRequest) -> Option<Entitlement> {
    req.extensions().get::<Entitlement>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{PlanType, SubscriptionStatus, school_entity as school};
    use crate::middlewares::AuthMiddleware;
    use crate::store::{MemoryDirectoryStore, MemorySubscriptionStore, NewSubscription};
    use crate::utils::JwtService;
    use actix_web::http::StatusCode;
    use actix_web::http::header;
    use actix_web::{App, HttpResponse, test, web};
    use chrono::Duration;

    const SECRET: &str = "gate-test-secret";

    async fn ok_stub() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    fn bearer() -> (header::HeaderName, String) {
        let jwt = JwtService::new(SECRET, 3600);
        let token = jwt.generate_access_token(10, 1, "admin").unwrap();
        (header::AUTHORIZATION, format!("Bearer {token}"))
    }

    // 认证 + 订阅闸门按 main 里的顺序组合，路由全部换成空桩
    macro_rules! gated_app {
        ($subs:expr, $dir:expr) => {
            test::init_service(
                App::new().service(
                    web::scope("/api/v1")
                        .wrap(EntitlementGate::new(
                            EntitlementService::new(Arc::new($subs.clone()), 7),
                            Arc::new($dir.clone()),
                        ))
                        .wrap(AuthMiddleware::new(JwtService::new(SECRET, 3600)))
                        .route("/announcements", web::get().to(ok_stub))
                        .route("/announcements", web::post().to(ok_stub))
                        .route("/subscription/current", web::get().to(ok_stub))
                        .route("/subscription/verify-payment", web::post().to(ok_stub)),
                ),
            )
            .await
        };
    }

    async fn seed_school(dir: &MemoryDirectoryStore, academic_year: Option<&str>) {
        dir.add_school(school::Model {
            id: 1,
            name: "Test School".to_string(),
            active_academic_year: academic_year.map(str::to_string),
            created_at: Some(Utc::now()),
        })
        .await;
    }

    /// 30 天前就到期、宽限期也早已过完的订阅
    async fn seed_lapsed_subscription(subs: &MemorySubscriptionStore) {
        let starts = Utc::now() - Duration::days(60);
        subs.seed(
            NewSubscription {
                school_id: 1,
                plan_type: PlanType::BasicMonthly,
                starts_at: starts,
                expires_at: starts + Duration::days(30),
                duration_days: 30,
                sms_monthly_limit: 500,
                whatsapp_monthly_limit: 0,
                payment_method: None,
                transaction_id: None,
                original_amount: 0,
                discount_amount: 0,
                final_amount: 0,
                test_mode: false,
            },
            SubscriptionStatus::Active,
        )
        .await;
    }

    async fn error_body(err: actix_web::Error) -> (StatusCode, serde_json::Value) {
        let resp = err.error_response();
        let status = resp.status();
        let bytes = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn test_expired_school_can_read_but_not_mutate() {
        let subs = MemorySubscriptionStore::new();
        let dir = MemoryDirectoryStore::new();
        seed_school(&dir, Some("2026-2027")).await;
        seed_lapsed_subscription(&subs).await;
        let app = gated_app!(subs, dir);

        // 只读降级：GET 放行
        let req = test::TestRequest::get()
            .uri("/api/v1/announcements")
            .insert_header(bearer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        // 变更类请求 403，带过期原因码
        let req = test::TestRequest::post()
            .uri("/api/v1/announcements")
            .insert_header(bearer())
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "SUBSCRIPTION_EXPIRED");
    }

    #[actix_web::test]
    async fn test_missing_academic_year_is_hard_rejected() {
        let subs = MemorySubscriptionStore::new();
        let dir = MemoryDirectoryStore::new();
        seed_school(&dir, None).await;
        seed_lapsed_subscription(&subs).await;
        let app = gated_app!(subs, dir);

        // 学年缺失连 GET 都是 400，与计费状态无关
        let req = test::TestRequest::get()
            .uri("/api/v1/announcements")
            .insert_header(bearer())
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "NO_ACADEMIC_YEAR");
    }

    #[actix_web::test]
    async fn test_billing_routes_stay_open_for_expired_school() {
        let subs = MemorySubscriptionStore::new();
        let dir = MemoryDirectoryStore::new();
        seed_school(&dir, Some("2026-2027")).await;
        seed_lapsed_subscription(&subs).await;
        let app = gated_app!(subs, dir);

        // 过期学校必须还能查看并续费
        let req = test::TestRequest::get()
            .uri("/api/v1/subscription/current")
            .insert_header(bearer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/api/v1/subscription/verify-payment")
            .insert_header(bearer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_missing_token_is_unauthorized() {
        let subs = MemorySubscriptionStore::new();
        let dir = MemoryDirectoryStore::new();
        seed_school(&dir, Some("2026-2027")).await;
        let app = gated_app!(subs, dir);

        let req = test::TestRequest::get()
            .uri("/api/v1/announcements")
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        let (status, _) = error_body(err).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
