//! Process entry point (§6, §9): loads configuration, connects to the KV
//! store, loads or generates TLS material, then wires the TLS gateway
//! listener (443) and the plain redirect listener (80) onto one Pingora
//! `Server`.
//!
//! Bootstrap needs `async` (KV connect, initial reload) before the
//! Pingora server — which manages its own per-service runtimes — ever
//! starts, so a short-lived Tokio runtime drives just that setup.

use std::path::PathBuf;
use std::sync::Arc;

use pingora_core::listeners::tls::TlsSettings;
use pingora_core::server::configuration::Opt;
use pingora_core::server::Server;
use pingora_proxy::http_proxy_service;

use mixproxy::config::Config;
use mixproxy::control::Supervisor;
use mixproxy::gateway::Gateway;
use mixproxy::kv::redis_store::RedisKv;
use mixproxy::kv::KvStore;
use mixproxy::logging::LogSink;
use mixproxy::redirect::Redirector;
use mixproxy::tls;

const LOG_DIR: &str = "logs";

fn main() {
    let mut log_sink = LogSink::new();
    log_sink.init_env_logger();

    let config_path = PathBuf::from(Config::DEFAULT_PATH);
    let config = Config::load(&config_path).unwrap_or_else(|e| {
        eprintln!("fatal: invalid configuration: {e}");
        std::process::exit(1);
    });

    let cert_material = tls::load_or_generate(&config).unwrap_or_else(|e| {
        eprintln!("fatal: TLS material unavailable: {e}");
        std::process::exit(1);
    });

    let bootstrap_rt = tokio::runtime::Runtime::new().expect("failed to start bootstrap runtime");
    let _rt_guard = bootstrap_rt.enter();

    let redis_url = std::env::var("MIXPROXY_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let redis_kv = bootstrap_rt.block_on(async {
        RedisKv::connect(&redis_url).await.unwrap_or_else(|e| {
            eprintln!("fatal: cannot reach KV store at {redis_url}: {e}");
            std::process::exit(1);
        })
    });
    let kv: Arc<dyn KvStore> = Arc::new(redis_kv);

    log_sink.spawn_file_writer(LOG_DIR);

    let supervisor = Arc::new(Supervisor::new(config, config_path, kv.clone()));
    // §4.7 start: "load config, validate, call reload to populate routing +
    // cache/ACL settings, then begin accepting connections."
    if let Err(e) = bootstrap_rt.block_on(supervisor.reload()) {
        log::warn!("initial reload failed, serving with the freshly loaded config: {e}");
    }

    let opt = Opt::parse_args();
    let mut server = Server::new(Some(opt)).expect("failed to build Pingora server");
    server.bootstrap();

    let gateway = Gateway::new(supervisor.clone(), kv.clone(), PathBuf::from(LOG_DIR));
    let mut gateway_service = http_proxy_service(&server.configuration, gateway);
    let tls_accept = tls::into_tls_accept(cert_material);
    let tls_settings =
        TlsSettings::with_callbacks(tls_accept).expect("failed to build TLS settings");
    gateway_service.add_tls_with_settings("0.0.0.0:443", None, tls_settings);
    server.add_service(gateway_service);

    let mut redirect_service = http_proxy_service(&server.configuration, Redirector);
    redirect_service.add_tcp("0.0.0.0:80");
    server.add_service(redirect_service);

    log::info!("mixproxy starting");
    server.run_forever();
}
