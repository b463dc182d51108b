use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::RngCore;
use signal_hook::consts::SIGHUP;
use signal_hook_tokio::Signals;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dynamic_prefix_controller::config::{Config, RequeueConfig};
use dynamic_prefix_controller::controller::{ha_controller, pool_controller, prefix_controller, InFlightGuard};
use dynamic_prefix_controller::shared::{ServerState, SharedState};
use dynamic_prefix_controller::store::{self, Store};

fn config_path() -> PathBuf {
    PathBuf::from(
        std::env::var("DYNAMIC_PREFIX_CONFIG_PATH")
            .unwrap_or_else(|_| "/var/lib/dynamic-prefix-controller/config.json".to_string()),
    )
}

/// Reads the MAC address of the first interface named by a `dhcpv6pd`
/// acquisition block across every seed prefix, for use as the DUID-LL
/// hardware address. Falls back to a random locally-administered address
/// when no interface is configured or the sysfs read fails, since the
/// controller can still run DHCPv6-PD against a test harness without one.
fn resolve_mac(config: &Config) -> [u8; 6] {
    let interface = config
        .seed_prefixes
        .iter()
        .find_map(|seed| seed.spec.acquisition.dhcpv6pd.as_ref())
        .map(|pd| pd.interface.clone());

    if let Some(interface) = interface {
        match read_interface_mac(&interface) {
            Ok(mac) => return mac,
            Err(e) => warn!("could not read MAC for {}: {}, using a random one", interface, e),
        }
    }

    random_locally_administered_mac()
}

fn read_interface_mac(interface: &str) -> Result<[u8; 6]> {
    let path = format!("/sys/class/net/{}/address", interface);
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    parse_mac(raw.trim()).with_context(|| format!("parsing MAC from {}", path))
}

fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let mut out = [0u8; 6];
    let parts: Vec<&str> = s.split(':').collect();
    anyhow::ensure!(parts.len() == 6, "expected 6 octets, got {}", parts.len());
    for (i, part) in parts.iter().enumerate() {
        out[i] = u8::from_str_radix(part, 16)?;
    }
    Ok(out)
}

fn random_locally_administered_mac() -> [u8; 6] {
    let mut mac = [0u8; 6];
    rand::rng().fill_bytes(&mut mac);
    mac[0] = (mac[0] & 0xfc) | 0x02; // locally administered, unicast
    mac
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dynamic_prefix_controller=info".parse().unwrap()),
        )
        .init();

    info!("dynamic-prefix-controller starting...");

    let path = config_path();
    let config = if path.exists() {
        Config::load_from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        info!("no config file found at {}, using defaults", path.display());
        Config::default()
    };

    let mac = resolve_mac(&config);
    info!(
        "resolved DUID hardware address {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );

    let seed_prefixes = config.seed_prefixes.clone();
    let state: SharedState = Arc::new(ServerState::new(config, mac));

    for seed in seed_prefixes {
        let resource = store::DynamicPrefix::new(seed.name.clone(), seed.spec);
        if let Err(e) = state.store.put_prefix(resource) {
            error!("failed to seed prefix {}: {}", seed.name, e);
        } else {
            info!("seeded prefix resource {}", seed.name);
        }
    }

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_sighup(state_clone).await {
            error!("SIGHUP handler error: {}", e);
        }
    });

    let cancel = CancellationToken::new();

    {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(run_prefix_controller(state, cancel));
    }
    {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(run_pool_controller(state, cancel));
    }
    {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(run_ha_controller(state, cancel));
    }

    info!("dynamic-prefix-controller started successfully");

    tokio::signal::ctrl_c().await?;
    info!("shutting down...");
    cancel.cancel();

    for name in state.registry.names().await {
        if let Err(e) = state.registry.teardown(&name).await {
            warn!("error tearing down receiver {}: {}", name, e);
        }
    }

    Ok(())
}

/// Runs the prefix resource controller (spec §4.C) as a periodic scan over
/// the store, respecting each resource's own requeue-after deadline and
/// never running two reconciles of the same name concurrently.
async fn run_prefix_controller(state: SharedState, cancel: CancellationToken) {
    let guard = Arc::new(InFlightGuard::new());
    let due: Arc<Mutex<HashMap<String, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let names: Vec<String> = state.store.list_prefixes().into_iter().map(|p| p.name).collect();
        let now = Instant::now();

        for name in names {
            {
                let mut due = due.lock().await;
                match due.get(&name) {
                    Some(deadline) if *deadline > now => continue,
                    _ => {}
                }
            }

            let Some(ticket) = guard.try_claim(&name) else { continue };
            let state = state.clone();
            let due = due.clone();
            tokio::spawn(async move {
                let _ticket = ticket;
                let requeue = requeue_config(&state).await;
                let mac = state.mac;
                match prefix_controller::reconcile_once(&name, state.store.as_ref(), &state.registry, &requeue, mac).await {
                    Ok(Some(delay)) => {
                        due.lock().await.insert(name, Instant::now() + delay);
                    }
                    Ok(None) => {
                        due.lock().await.remove(&name);
                    }
                    Err(e) => {
                        warn!("reconcile of prefix {} failed: {}", name, e);
                        due.lock().await.insert(name, Instant::now() + Duration::from_secs(requeue.receiver_failure_secs));
                    }
                }
            });
        }
    }
}

/// Runs the pool projection controller (spec §4.D), same scheduling shape
/// as the prefix controller but fully synchronous per reconcile.
async fn run_pool_controller(state: SharedState, cancel: CancellationToken) {
    let due: Arc<Mutex<HashMap<String, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut ticker = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let names: Vec<String> = state.store.list_pools().into_iter().map(|p| p.name).collect();
        let now = Instant::now();
        let requeue = requeue_config(&state).await;

        for name in names {
            {
                let mut due = due.lock().await;
                match due.get(&name) {
                    Some(deadline) if *deadline > now => continue,
                    _ => {}
                }
            }

            match pool_controller::reconcile_once(&name, state.store.as_ref(), &requeue) {
                Some(delay) => {
                    due.lock().await.insert(name, Instant::now() + delay);
                }
                None => {
                    due.lock().await.remove(&name);
                }
            }
        }
    }
}

/// Runs the HA service controller (spec §4.E), on the same cadence as the
/// pool controller since both only matter once a prefix has changed.
async fn run_ha_controller(state: SharedState, cancel: CancellationToken) {
    let due: Arc<Mutex<HashMap<String, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut ticker = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let names: Vec<String> = state.store.list_services().into_iter().map(|s| s.name).collect();
        let now = Instant::now();
        let requeue = requeue_config(&state).await;

        for name in names {
            {
                let mut due = due.lock().await;
                match due.get(&name) {
                    Some(deadline) if *deadline > now => continue,
                    _ => {}
                }
            }

            match ha_controller::reconcile_once(&name, state.store.as_ref(), &requeue) {
                Some(delay) => {
                    due.lock().await.insert(name, Instant::now() + delay);
                }
                None => {
                    due.lock().await.remove(&name);
                }
            }
        }
    }
}

async fn requeue_config(state: &SharedState) -> RequeueConfig {
    state.config.read().await.requeue.clone()
}

/// SIGHUP reloads `logLevel` and `requeue` tunables only; `seedPrefixes`
/// is intentionally not reapplied, since re-seeding would silently stomp
/// on live controller-owned status fields.
async fn handle_sighup(state: SharedState) -> Result<()> {
    let mut signals = Signals::new([SIGHUP])?;

    while let Some(signal) = signals.next().await {
        if signal == SIGHUP {
            info!("received SIGHUP, reloading config...");

            match Config::load_from_file(&config_path()) {
                Ok(new_config) => {
                    let mut config = state.config.write().await;
                    config.log_level = new_config.log_level;
                    config.requeue = new_config.requeue;
                    info!("config reloaded successfully");
                }
                Err(e) => {
                    error!("failed to reload config: {}", e);
                }
            }
        }
    }

    Ok(())
}
