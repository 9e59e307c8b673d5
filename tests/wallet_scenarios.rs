//! End-to-end wallet flows over the gateway: UI surface, confirmation
//! surface and a page behind the relay, against an in-memory chain.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use wallet_core::background::{
    serve_relay, serve_ui, Background, BackgroundRunner, SurfaceConfirmer, SurfaceLauncher,
};
use wallet_core::dispatch::{
    ChainClient, ChainError, CounterSource, CounterState, Estimate, OperationBatch,
};
use wallet_core::gateway::{
    Channel, Exposure, GatewayClient, GatewayServer, MemoryChannel, Relay, RequestHandler,
};
use wallet_core::vault::{KdfParams, MemoryStorage};
use wallet_core::wallet::SignedBytes;
use wallet_core::{Config, ProtocolError, Result};

const PASSWORD: &str = "correct horse battery staple";
const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const DAPP: &str = "https://dapp.example";

/// Chain with one shared counter, 41 before anything is injected
struct FakeChain {
    consumed: AtomicU64,
    fail_inject: AtomicBool,
    injected: Mutex<Vec<Vec<u64>>>,
}

impl FakeChain {
    fn new() -> Self {
        Self {
            consumed: AtomicU64::new(41),
            fail_inject: AtomicBool::new(false),
            injected: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CounterSource for FakeChain {
    async fn onchain_counter(&self, _address: &str) -> std::result::Result<u64, ChainError> {
        Ok(self.consumed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn forge(&self, batch: &OperationBatch) -> std::result::Result<Vec<u8>, ChainError> {
        serde_json::to_vec(batch).map_err(|e| ChainError::new(e.to_string()))
    }

    async fn estimate(
        &self,
        batch: &OperationBatch,
        _signed: &SignedBytes,
    ) -> std::result::Result<Vec<Estimate>, ChainError> {
        Ok(batch
            .operations
            .iter()
            .map(|_| Estimate {
                gas_limit: 10_000,
                storage_limit: 100,
                suggested_fee: 1_000,
            })
            .collect())
    }

    async fn inject(&self, signed: &SignedBytes) -> std::result::Result<String, ChainError> {
        // Long enough for a second submission to queue up behind this one
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_inject.load(Ordering::SeqCst) {
            return Err(ChainError::new("node unreachable"));
        }
        let batch: OperationBatch =
            serde_json::from_slice(&signed.bytes).map_err(|e| ChainError::new(e.to_string()))?;
        let counters = batch.counters();
        if let Some(last) = counters.last() {
            self.consumed.fetch_max(*last, Ordering::SeqCst);
        }
        let mut injected = self.injected.lock();
        injected.push(counters);
        Ok(format!("oo{}", injected.len()))
    }

    async fn is_included(&self, _op_hash: &str) -> std::result::Result<bool, ChainError> {
        Ok(true)
    }
}

/// Confirmation surface that answers every prompt the same way
struct AutoDecider {
    approve: bool,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RequestHandler for AutoDecider {
    async fn handle(&self, payload: Value) -> Result<Value> {
        let kind = payload["type"].as_str().unwrap_or_default().to_string();
        self.prompts.lock().push(kind);
        Ok(json!({ "approved": self.approve }))
    }
}

struct AutoSurface {
    approve: bool,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SurfaceLauncher for AutoSurface {
    async fn open(&self) -> Result<Arc<dyn Channel>> {
        let (background_end, surface_end) = MemoryChannel::pair();
        let decider = AutoDecider {
            approve: self.approve,
            prompts: self.prompts.clone(),
        };
        tokio::spawn(async move {
            GatewayServer::new(Arc::new(decider), Exposure::Trusted)
                .serve(Arc::new(surface_end))
                .await;
        });
        Ok(Arc::new(background_end))
    }
}

struct Wallet {
    background: Arc<Background<FakeChain>>,
    chain: Arc<FakeChain>,
    storage: Arc<MemoryStorage>,
    prompts: Arc<Mutex<Vec<String>>>,
    config: Config,
    _policy_dir: TempDir,
}

impl Wallet {
    async fn start(approve: bool) -> Self {
        let policy_dir = TempDir::new().unwrap();
        std::fs::write(
            policy_dir.path().join("policy.json"),
            json!({
                "mode": "internal-only",
                "rules": [
                    {"operation": "GetAccount", "origins": [DAPP]},
                    {"operation": "SignPayload", "origins": [DAPP], "rule_id": "dapp-sign"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let mut config = Config::default();
        config.vault.kdf = KdfParams::insecure_fast();
        config.dispatch.confirmation_poll_interval_ms = 5;
        config.policy.policy_dir = Some(policy_dir.path().display().to_string());

        let chain = Arc::new(FakeChain::new());
        let storage = Arc::new(MemoryStorage::new());
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let background = start_background(&config, chain.clone(), storage.clone(), approve, &prompts).await;

        Self {
            background,
            chain,
            storage,
            prompts,
            config,
            _policy_dir: policy_dir,
        }
    }

    /// Same storage, fresh process state
    async fn restart(&self) -> Arc<Background<FakeChain>> {
        start_background(
            &self.config,
            self.chain.clone(),
            self.storage.clone(),
            true,
            &self.prompts,
        )
        .await
    }

    fn connect_ui(&self, background: &Arc<Background<FakeChain>>) -> GatewayClient {
        let (ui_end, background_end) = MemoryChannel::pair();
        let background = background.clone();
        tokio::spawn(async move { serve_ui(&background, Arc::new(background_end)).await });
        GatewayClient::connect(Arc::new(ui_end), self.config.gateway.request_timeout())
    }

    fn connect_page(&self, origin: &str) -> GatewayClient {
        let (relay_end, background_end) = MemoryChannel::pair();
        let background = self.background.clone();
        tokio::spawn(async move { serve_relay(&background, Arc::new(background_end)).await });

        let upstream = Arc::new(GatewayClient::connect(
            Arc::new(relay_end),
            self.config.gateway.request_timeout(),
        ));
        let relay = Arc::new(Relay::new(origin, upstream));
        let (page_end, relay_page_end) = MemoryChannel::pair();
        tokio::spawn(relay.run(Arc::new(relay_page_end)));
        GatewayClient::connect(Arc::new(page_end), self.config.gateway.request_timeout())
    }
}

async fn start_background(
    config: &Config,
    chain: Arc<FakeChain>,
    storage: Arc<MemoryStorage>,
    approve: bool,
    prompts: &Arc<Mutex<Vec<String>>>,
) -> Arc<Background<FakeChain>> {
    let confirmer = SurfaceConfirmer::new(
        Arc::new(AutoSurface {
            approve,
            prompts: prompts.clone(),
        }),
        config.gateway.confirmation_surface_timeout(),
    );
    BackgroundRunner::new(config.clone())
        .start_with_storage(chain, Arc::new(confirmer), storage)
        .await
        .unwrap()
}

async fn set_up(ui: &GatewayClient) -> Value {
    assert_ok!(
        ui.request(json!({"type": "Setup", "password": PASSWORD, "mnemonic": MNEMONIC}))
            .await
    )
}

fn remote_code(err: ProtocolError) -> Option<String> {
    match err {
        ProtocolError::Remote { code, .. } => code,
        other => panic!("expected a remote error, got {:?}", other),
    }
}

fn transfer(amount: &str) -> Value {
    json!({"kind": "transaction", "destination": "tz1burnburnburnburnburnburnburjAYjjX", "amount": amount})
}

#[tokio::test]
async fn unlock_after_failed_attempts_returns_setup_accounts() {
    let wallet = Wallet::start(true).await;
    let ui = wallet.connect_ui(&wallet.background);
    let setup = set_up(&ui).await;
    let created = setup["accounts"].clone();
    assert_eq!(created.as_array().map(Vec::len), Some(1));

    // A restarted background starts locked
    let background = wallet.restart().await;
    let ui = wallet.connect_ui(&background);
    let state = assert_ok!(ui.request(json!({"type": "GetState"})).await);
    assert_eq!(state, json!({"type": "State", "initialized": true, "unlocked": false}));

    for _ in 0..2 {
        let err = assert_err!(ui.request(json!({"type": "Unlock", "password": "wrong"})).await);
        assert_eq!(remote_code(err).as_deref(), Some("INVALID_PASSWORD"));
    }

    let mut notifications = ui.subscribe();
    let unlocked = assert_ok!(ui.request(json!({"type": "Unlock", "password": PASSWORD})).await);
    assert_eq!(unlocked["type"], json!("Unlocked"));
    assert_eq!(unlocked["accounts"], created);

    let pushed = tokio::time::timeout(Duration::from_secs(1), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pushed, json!({"type": "Unlocked"}));
}

#[tokio::test]
async fn repeated_unlock_failures_are_throttled() {
    let wallet = Wallet::start(true).await;
    let ui = wallet.connect_ui(&wallet.background);
    set_up(&ui).await;
    assert_ok!(ui.request(json!({"type": "Lock"})).await);

    for _ in 0..3 {
        let err = assert_err!(ui.request(json!({"type": "Unlock", "password": "wrong"})).await);
        assert_eq!(remote_code(err).as_deref(), Some("INVALID_PASSWORD"));
    }
    let err = assert_err!(ui.request(json!({"type": "Unlock", "password": PASSWORD})).await);
    assert_eq!(remote_code(err).as_deref(), Some("BLOCKED"));
}

#[tokio::test]
async fn concurrent_submissions_get_contiguous_counters() {
    let wallet = Wallet::start(true).await;
    let ui = Arc::new(wallet.connect_ui(&wallet.background));
    let setup = set_up(&ui).await;
    let source = setup["accounts"][0]["address"].clone();

    let requests = [vec![transfer("1"), transfer("2")], vec![transfer("3")]].map(|operations| {
        let ui = ui.clone();
        let request = json!({"type": "SendOperations", "source": source, "operations": operations});
        tokio::spawn(async move { ui.request(request).await })
    });

    let mut batches = Vec::new();
    for handle in futures::future::join_all(requests).await {
        let sent = assert_ok!(handle.unwrap());
        let counters: Vec<u64> = serde_json::from_value(sent["outcome"]["counters"].clone()).unwrap();
        batches.push(counters);
    }
    batches.sort();

    // Whichever went first, the other continues right after it
    let flattened: Vec<u64> = batches.concat();
    assert_eq!(flattened, vec![42, 43, 44]);
    assert!(batches.contains(&vec![42, 43]) || batches.contains(&vec![43, 44]));
    assert_eq!(wallet.chain.injected.lock().len(), 2);
    assert_eq!(
        wallet.prompts.lock().iter().filter(|k| *k == "Operations").count(),
        2
    );
}

#[tokio::test]
async fn failed_submission_rolls_counter_back() {
    let wallet = Wallet::start(true).await;
    let ui = wallet.connect_ui(&wallet.background);
    let setup = set_up(&ui).await;
    let source = setup["accounts"][0]["address"].as_str().unwrap().to_string();
    let queue = wallet.background.dispatcher().queue().clone();

    let sent = assert_ok!(
        ui.request(json!({"type": "SendOperations", "source": source, "operations": [transfer("1")]}))
            .await
    );
    assert_eq!(sent["outcome"]["counters"], json!([42]));
    let before = queue.counter_state(&source).await;
    assert_eq!(before, Some(CounterState { pending: 42, released: 42 }));

    wallet.chain.fail_inject.store(true, Ordering::SeqCst);
    let err = assert_err!(
        ui.request(json!({"type": "SendOperations", "source": source, "operations": [transfer("2"), transfer("3")]}))
            .await
    );
    assert_eq!(remote_code(err).as_deref(), Some("SUBMISSION_FAILED"));
    assert_eq!(queue.counter_state(&source).await, before);

    // A dry run predicts the rolled-back counter again
    let estimated = assert_ok!(
        ui.request(json!({"type": "DryRun", "source": source, "operations": [transfer("4")]}))
            .await
    );
    let forged = alloy::hex::decode(estimated["outcome"]["bytes"].as_str().unwrap()).unwrap();
    let batch: OperationBatch = serde_json::from_slice(&forged).unwrap();
    assert_eq!(batch.counters(), vec![43]);

    wallet.chain.fail_inject.store(false, Ordering::SeqCst);
    let sent = assert_ok!(
        ui.request(json!({"type": "SendOperations", "source": source, "operations": [transfer("5")]}))
            .await
    );
    assert_eq!(sent["outcome"]["counters"], json!([43]));
}

#[tokio::test]
async fn page_signs_through_relay_after_approval() {
    let wallet = Wallet::start(true).await;
    let ui = wallet.connect_ui(&wallet.background);
    let setup = set_up(&ui).await;
    let page = wallet.connect_page(DAPP);

    let account = assert_ok!(page.request(json!({"type": "GetAccount"})).await);
    assert_eq!(account["account"]["address"], setup["accounts"][0]["address"]);

    let signed = assert_ok!(page.request(json!({"type": "SignPayload", "payload": "0x03cafe"})).await);
    assert_eq!(signed["bytes"], json!("03cafe"));
    assert!(signed["signature"].as_str().unwrap().starts_with("edsig"));
    assert_eq!(*wallet.prompts.lock(), vec!["SignPayload".to_string()]);
}

#[tokio::test]
async fn page_limits_are_enforced() {
    let wallet = Wallet::start(false).await;
    let ui = wallet.connect_ui(&wallet.background);
    set_up(&ui).await;

    // Not on the allow-list for this origin
    let page = wallet.connect_page(DAPP);
    let err = assert_err!(
        page.request(json!({"type": "RequestOperations", "operations": [transfer("1")]}))
            .await
    );
    assert_eq!(remote_code(err).as_deref(), Some("ORIGIN_NOT_ALLOWED"));

    // Allowed, but the user declines
    let err = assert_err!(page.request(json!({"type": "SignPayload", "payload": "00"})).await);
    assert_eq!(remote_code(err).as_deref(), Some("DECLINED"));

    // Unknown origin
    let stranger = wallet.connect_page("https://evil.example");
    let err = assert_err!(stranger.request(json!({"type": "GetAccount"})).await);
    assert_eq!(remote_code(err).as_deref(), Some("ORIGIN_NOT_ALLOWED"));

    // Pages never see secrets in error details
    let err = assert_err!(page.request(json!({"type": "SignPayload", "payload": "zz"})).await);
    match err {
        ProtocolError::Remote { message, code } => {
            assert_eq!(message, "Request failed");
            assert_eq!(code.as_deref(), Some("REQUEST_FAILED"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
