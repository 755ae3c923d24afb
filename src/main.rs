use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;

use schoolpulse_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{MailRelayGateway, TwilioSmsGateway},
    handlers,
    middlewares::{AuthMiddleware, EntitlementGate, create_cors},
    services::*,
    store::{PgAnnouncementStore, PgDirectoryStore, PgSubscriptionStore},
    swagger::swagger_config,
    utils::JwtService,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml().expect("Failed to load configuration file");

    // 创建数据库连接池
    let pool = create_pool(&config.database)
        .await
        .expect("Failed to create database connection pool");

    // 运行数据库迁移
    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    // 创建JWT服务
    let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.access_token_expires_in);

    // 外部通道网关
    let sms_gateway = Arc::new(TwilioSmsGateway::new(config.sms.clone()));
    let mail_gateway = Arc::new(MailRelayGateway::new(config.mail.clone()));

    // 存储层
    let subscription_store = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let directory_store = Arc::new(PgDirectoryStore::new(pool.clone()));
    let announcement_store = Arc::new(PgAnnouncementStore::new(pool.clone()));

    // 创建服务
    let entitlement_service = EntitlementService::new(
        subscription_store.clone(),
        config.billing.grace_period_days,
    );
    let subscription_service = SubscriptionService::new(
        subscription_store.clone(),
        entitlement_service.clone(),
        config.billing.trial_days,
    );
    let quota_ledger = QuotaLedger::new(subscription_store.clone());
    let audience_expander = AudienceExpander::new(directory_store.clone());
    let notification_fanout = NotificationFanout::new(quota_ledger, sms_gateway, mail_gateway);
    let announcement_service = AnnouncementService::new(
        announcement_store,
        subscription_store.clone(),
        audience_expander,
        notification_fanout,
    );

    // 启动HTTP服务器
    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .app_data(web::Data::new(subscription_service.clone()))
            .app_data(web::Data::new(announcement_service.clone()))
            .configure(swagger_config)
            .service(
                web::scope("/api/v1")
                    // 注意 wrap 的执行顺序是后注册先执行：认证在前，订阅闸门在后
                    .wrap(EntitlementGate::new(
                        entitlement_service.clone(),
                        directory_store.clone(),
                    ))
                    .wrap(AuthMiddleware::new(jwt_service.clone()))
                    .configure(handlers::subscription_config)
                    .configure(handlers::announcement_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
