pub const ENGINE_NAME: &str = "stocklab";

pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn engine_name() -> String {
    format!("{ENGINE_NAME}/{}", engine_version())
}
