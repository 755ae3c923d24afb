use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{PlanType, SubscriptionStatus};
use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        )
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::subscription::get_current_subscription,
        handlers::subscription::get_plans,
        handlers::subscription::checkout,
        handlers::subscription::verify_payment,
        handlers::subscription::cancel_subscription,
        handlers::announcement::create_announcement,
        handlers::announcement::list_announcements,
    ),
    components(
        schemas(
            PlanType,
            SubscriptionStatus,
            Feature,
            Channel,
            PlanSpec,
            PlanInfo,
            Entitlement,
            SubscriptionResponse,
            CurrentSubscriptionResponse,
            handlers::subscription::CheckoutRequest,
            VerifyPaymentRequest,
            VerifyPaymentResponse,
            CancelSubscriptionResponse,
            AudienceRole,
            CreateAnnouncementRequest,
            AnnouncementResponse,
            DeliverySummary,
            CreateAnnouncementResponse,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "subscription", description = "Subscription & entitlement API"),
        (name = "announcement", description = "Announcement broadcast API"),
    ),
    info(
        title = "SchoolPulse Backend API",
        version = "1.0.0",
        description = "SchoolPulse school administration REST API documentation",
        contact(
            name = "API Support",
            email = "support@schoolpulse.app"
        )
    ),
    servers(
        (url = "/", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
