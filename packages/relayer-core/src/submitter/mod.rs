use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{
    bus::TxBus,
    chains::{self, ChainFamily},
    compose::PolyComposer,
    config::{RelayerConfig, SubmitterConfig},
    types::{Account, Tx},
    Error, Result,
};

pub mod eth;
pub mod neo;
pub mod poly;

pub use eth::EthSubmitter;
pub use neo::NeoSubmitter;
pub use poly::{PolySubmitter, RelaySubmitter};

/// Destination side of a chain: delivers relay chain committed txs.
#[async_trait]
pub trait Submitter: Send + Sync {
    fn chain_id(&self) -> u64;

    fn name(&self) -> String;

    /// Managed accounts, fixed once the submitter is initialized.
    fn accounts(&self) -> Vec<Account>;

    async fn poly_epoch_start_height(&self) -> Result<u32>;

    async fn poly_keepers(&self) -> Result<Vec<u8>>;

    /// Attaches the destination's current epoch, lets `compose` fill the
    /// relay chain proof, then packs and broadcasts the call.
    async fn process_tx(&self, tx: &mut Tx, compose: &dyn PolyComposer) -> Result<()>;

    /// Reserved low level entry point; delivery goes through `process_tx`.
    async fn submit(&self, _tx: &Tx) -> Result<()> {
        Ok(())
    }
}

/// Builds and initializes the submitter of a destination chain.
pub async fn new_submitter(config: &SubmitterConfig) -> Result<Arc<dyn Submitter>> {
    match chains::chain_family(config.chain_id) {
        ChainFamily::Evm => Ok(Arc::new(EthSubmitter::init(config).await?)),
        ChainFamily::Script => Ok(Arc::new(NeoSubmitter::init(config).await?)),
        _ => Err(Error::Config(format!(
            "Unsupported submitter chain: {}",
            chains::chain_name(config.chain_id)
        ))),
    }
}

/// Backoff between delivery attempts of a requeued tx. Retries stay
/// unbounded, only the pause grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after the `attempts`-th failure: `base * 2^(attempts - 1)`,
    /// capped at `max`.
    pub fn delay(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl From<&RelayerConfig> for RetryPolicy {
    fn from(config: &RelayerConfig) -> Self {
        Self::new(
            Duration::from_secs(config.retry_delay),
            Duration::from_secs(config.max_retry_delay),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub retry: RetryPolicy,
    /// Idle pause when the queue is empty or unavailable.
    pub poll_interval: Duration,
}

impl From<&RelayerConfig> for WorkerSettings {
    fn from(config: &RelayerConfig) -> Self {
        Self {
            retry: RetryPolicy::from(config),
            poll_interval: Duration::from_secs(config.poll_interval),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Submitted,
    /// Dropped as permanently invalid.
    Skipped,
    /// Pushed back with the given attempt count.
    Requeued(u32),
}

/// One delivery attempt of a popped tx on behalf of `account`.
///
/// Permanent failures are dropped, every other failure bumps `attempts`
/// and pushes the tx back. Only a failed push is returned as an error.
pub async fn handle(
    submitter: &dyn Submitter,
    bus: &dyn TxBus,
    composer: &dyn PolyComposer,
    account: &Account,
    mut tx: Tx,
) -> Result<Outcome> {
    let name = submitter.name();
    info!(
        "Processing poly tx {} on {} with account {}",
        tx.poly_hash, name, account.address
    );
    tx.dst_sender = Some(account.clone());
    match submitter.process_tx(&mut tx, composer).await {
        Ok(()) => {
            info!(
                "Submitted poly tx {} to {}, dst hash {}",
                tx.poly_hash, name, tx.dst_hash
            );
            Ok(Outcome::Submitted)
        }
        Err(e) => {
            error!(
                "Process poly tx {} on {} error: {}, tx {}",
                tx.poly_hash,
                name,
                e,
                tx.encode().unwrap_or_default()
            );
            if e.is_invalid_tx() {
                error!("Skipped invalid poly tx {}", tx.poly_hash);
                return Ok(Outcome::Skipped);
            }
            tx.attempts += 1;
            bus.push(&tx).await?;
            Ok(Outcome::Requeued(tx.attempts))
        }
    }
}

pub(crate) async fn pause(token: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

/// Worker loop bound to one account. Checks `token` before every pop; an
/// attempt already in flight runs to completion.
pub async fn run(
    submitter: Arc<dyn Submitter>,
    account: Account,
    bus: Arc<dyn TxBus>,
    composer: Arc<dyn PolyComposer>,
    settings: WorkerSettings,
    token: CancellationToken,
) {
    let name = submitter.name();
    loop {
        if token.is_cancelled() {
            info!("Submitter {} worker {} is exiting now", name, account.address);
            return;
        }
        let tx = match bus.pop().await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                pause(&token, settings.poll_interval).await;
                continue;
            }
            Err(e) => {
                error!("Bus pop error on {}: {}", name, e);
                pause(&token, settings.poll_interval).await;
                continue;
            }
        };
        let hash = tx.poly_hash.clone();
        match handle(submitter.as_ref(), bus.as_ref(), composer.as_ref(), &account, tx).await {
            Ok(Outcome::Requeued(attempts)) => {
                pause(&token, settings.retry.delay(attempts)).await;
            }
            Ok(_) => {}
            Err(e) => error!("Failed to requeue poly tx {} on {}: {}", hash, name, e),
        }
    }
}

/// Spawns one worker per managed account onto `tracker`.
pub fn start(
    submitter: Arc<dyn Submitter>,
    bus: Arc<dyn TxBus>,
    composer: Arc<dyn PolyComposer>,
    settings: WorkerSettings,
    token: CancellationToken,
    tracker: &TaskTracker,
) {
    let accounts = submitter.accounts();
    let name = submitter.name();
    if accounts.is_empty() {
        warn!("No account available for submitter workers on {}", name);
    }
    for (i, account) in accounts.into_iter().enumerate() {
        info!(
            "Starting submitter worker {} for {} with account {}",
            i, name, account.address
        );
        tracker.spawn(run(
            submitter.clone(),
            account,
            bus.clone(),
            composer.clone(),
            settings,
            token.clone(),
        ));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Submitter double that replays a scripted sequence of results and
    /// records the txs it saw.
    pub struct ScriptedSubmitter {
        pub chain_id: u64,
        pub accounts: Vec<Account>,
        pub results: Mutex<Vec<Result<()>>>,
        pub seen: Mutex<Vec<Tx>>,
    }

    impl ScriptedSubmitter {
        pub fn new(chain_id: u64, accounts: Vec<Account>, results: Vec<Result<()>>) -> Self {
            Self {
                chain_id,
                accounts,
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Submitter for ScriptedSubmitter {
        fn chain_id(&self) -> u64 {
            self.chain_id
        }

        fn name(&self) -> String {
            chains::chain_name(self.chain_id)
        }

        fn accounts(&self) -> Vec<Account> {
            self.accounts.clone()
        }

        async fn poly_epoch_start_height(&self) -> Result<u32> {
            Ok(0)
        }

        async fn poly_keepers(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn process_tx(&self, tx: &mut Tx, compose: &dyn PolyComposer) -> Result<()> {
            compose.compose(tx).await?;
            self.seen.lock().unwrap().push(tx.clone());
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        }
    }
}
