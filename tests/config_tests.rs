use mesh_m2n::config::{M2nConfig, ServerMode};
use mesh_m2n::net::registry::ConnectionRegistry;
use std::time::Duration;

#[test]
fn config_from_json() {
    let cfg: M2nConfig = serde_json::from_str(
        r#"{
            "machine_names": ["render-0", "render-1"],
            "number_of_connections": 3,
            "mode": "render_server",
            "wait_timeout_ms": 2500
        }"#,
    )
    .unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.mode, ServerMode::RenderServer);
    assert_eq!(cfg.wait_timeout(), Some(Duration::from_millis(2500)));
    assert_eq!(cfg.host_fallback, "localhost");

    let reg = cfg.registry();
    assert_eq!(reg.resolve_host(1), "render-1");
    assert_eq!(reg.resolve_host(2), "localhost");
}

#[test]
fn mode_names() {
    let modes: Vec<ServerMode> =
        serde_json::from_str(r#"["server", "render_server", "client"]"#).unwrap();
    assert_eq!(
        modes,
        vec![ServerMode::DataServer, ServerMode::RenderServer, ServerMode::Client]
    );
    assert!(serde_json::from_str::<ServerMode>(r#""data_server""#).is_err());
}

#[test]
fn registry_survives_serialization() {
    let mut reg = ConnectionRegistry::new(2);
    reg.set_endpoint(0, 4100, "render-0").unwrap();
    reg.set_endpoint(1, 4101, "render-1").unwrap();
    let text = serde_json::to_string(&reg).unwrap();
    let back: ConnectionRegistry = serde_json::from_str(&text).unwrap();
    assert_eq!(back, reg);
    assert_eq!(back.endpoint(1).map(|e| e.port), Some(4101));
}
