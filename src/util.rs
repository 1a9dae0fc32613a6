const MONITORING_API_BIND: &str = "MONITORING_API_BIND";

const DEFAULT_BIND: &str = "127.0.0.1:8080";

pub fn get_default_bind() -> String {
    DEFAULT_BIND.to_string()
}

pub fn get_api_bind() -> Option<String> {
    std::env::var(MONITORING_API_BIND)
        .ok()
        .filter(|bind| !bind.trim().is_empty())
}

const MONITORING_API_TOKEN: &str = "MONITORING_API_TOKEN";

pub fn get_api_token() -> Option<String> {
    std::env::var(MONITORING_API_TOKEN)
        .ok()
        .filter(|token| !token.is_empty())
}
