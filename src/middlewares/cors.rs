use actix_cors::Cors;

pub fn create_cors() -> Cors {
    Cors::default()
        // 学校前端域名因租户部署而异，白名单交给部署侧的反向代理收紧
        .allowed_origin_fn(|_, _req_head| true)
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        // 管理端会带自定义 Header，放宽以免预检失败
        .allow_any_header()
        // Bearer 之外管理端还携带 Cookie 凭据
        .supports_credentials()
        .max_age(3600)
}
