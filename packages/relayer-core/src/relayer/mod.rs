use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{
    bus::{open_bus_factory, BusFactory, BusKey, TxBus},
    chains,
    compose::{PolyComposer, RelayComposer},
    config::{
        Config, HandlerConfig, HeaderSyncConfig, ListenerConfig, PolyChainConfig, SubmitterConfig,
    },
    listener::{self, Listener},
    node::{poly::PolyRpcClient, PolyNode},
    submitter::{self, pause, Outcome, PolySubmitter, RelaySubmitter, Submitter, WorkerSettings},
    types::Tx,
    Error, Result,
};

/// Builds the per chain capabilities the handlers drive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainFactory: Send + Sync {
    fn listener(&self, config: &ListenerConfig) -> Result<Arc<dyn Listener>>;

    async fn submitter(&self, config: &SubmitterConfig) -> Result<Arc<dyn Submitter>>;

    async fn relay_submitter(&self) -> Result<Arc<dyn RelaySubmitter>>;

    fn composer(&self) -> Result<Arc<dyn PolyComposer>>;
}

/// Dispatches on chain id and talks to the relay chain configured in `poly`.
/// Every handler shares one relay submitter, and with it the wallet's
/// per-account send locks.
pub struct DefaultChainFactory {
    poly: PolyChainConfig,
    relay: OnceCell<Arc<dyn RelaySubmitter>>,
}

impl DefaultChainFactory {
    pub fn new(poly: PolyChainConfig) -> Self {
        Self {
            poly,
            relay: OnceCell::new(),
        }
    }

    fn poly_node(&self) -> Result<Arc<dyn PolyNode>> {
        Ok(Arc::new(PolyRpcClient::new(self.poly.nodes.clone())?))
    }
}

#[async_trait]
impl ChainFactory for DefaultChainFactory {
    fn listener(&self, config: &ListenerConfig) -> Result<Arc<dyn Listener>> {
        listener::new_listener(config, self.poly_node()?)
    }

    async fn submitter(&self, config: &SubmitterConfig) -> Result<Arc<dyn Submitter>> {
        submitter::new_submitter(config).await
    }

    async fn relay_submitter(&self) -> Result<Arc<dyn RelaySubmitter>> {
        let relay = self
            .relay
            .get_or_try_init(|| async {
                let relay: Arc<dyn RelaySubmitter> =
                    Arc::new(PolySubmitter::init(&self.poly).await?);
                Ok::<_, Error>(relay)
            })
            .await?;
        Ok(relay.clone())
    }

    fn composer(&self) -> Result<Arc<dyn PolyComposer>> {
        Ok(Arc::new(RelayComposer::new(self.poly_node()?)))
    }
}

/// Everything a handler needs to build its capabilities.
#[derive(Clone)]
pub struct HandlerContext {
    pub listener: ListenerConfig,
    pub submitter: SubmitterConfig,
    pub factory: Arc<dyn ChainFactory>,
    pub buses: Arc<dyn BusFactory>,
    pub settings: WorkerSettings,
}

/// One pipeline stage of one chain.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    fn chain(&self) -> u64;

    /// Builds capabilities; the first failure aborts server startup.
    async fn init(&mut self, token: CancellationToken) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Cancels the stage and waits for its tasks to finish.
    async fn stop(&self) -> Result<()>;
}

#[derive(Default)]
struct Lifecycle {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Lifecycle {
    fn init(&mut self, parent: &CancellationToken) {
        self.token = parent.child_token();
    }

    async fn stop(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn not_initialized(name: &str, chain: u64) -> Error {
    Error::Config(format!(
        "{} handler for {} started before init",
        name,
        chains::chain_name(chain)
    ))
}

/// Syncs headers `next..` up to `batch` at a time, staying `defer` blocks
/// behind the tip. Returns the last height covered.
pub async fn header_sync_step(
    listener: &dyn Listener,
    relay: &dyn RelaySubmitter,
    next: u64,
    batch: usize,
) -> Result<u64> {
    let tip = listener.latest_height().await?.saturating_sub(listener.defer());
    if next > tip {
        return Ok(next.saturating_sub(1));
    }
    let end = tip.min(next + batch.max(1) as u64 - 1);
    let mut headers = Vec::new();
    for height in next..=end {
        let (header, _) = listener.header(height).await?;
        if !header.is_empty() {
            headers.push(header);
        }
    }
    if !headers.is_empty() {
        relay.submit_headers(listener.chain_id(), headers).await?;
    }
    Ok(end)
}

async fn run_header_sync(
    listener: Arc<dyn Listener>,
    relay: Arc<dyn RelaySubmitter>,
    config: HeaderSyncConfig,
    token: CancellationToken,
) {
    let name = chains::chain_name(listener.chain_id());
    let mut last = loop {
        if token.is_cancelled() {
            return;
        }
        match listener.last_header_sync(config.start_height, 0).await {
            Ok(height) => break height,
            Err(e) => {
                error!("Failed to resolve header sync height of {}: {}", name, e);
                pause(&token, listener.listen_check()).await;
            }
        }
    };
    info!("Header sync of {} resumes after height {}", name, last);
    loop {
        if token.is_cancelled() {
            info!("Header sync of {} is exiting now", name);
            return;
        }
        match header_sync_step(listener.as_ref(), relay.as_ref(), last + 1, config.batch).await {
            Ok(height) if height == last => pause(&token, listener.listen_check()).await,
            Ok(height) => last = height,
            Err(e) => {
                error!("Header sync of {} at {} error: {}", name, last + 1, e);
                pause(&token, listener.listen_check()).await;
            }
        }
    }
}

pub struct HeaderSyncHandler {
    config: HeaderSyncConfig,
    ctx: HandlerContext,
    listener: Option<Arc<dyn Listener>>,
    relay: Option<Arc<dyn RelaySubmitter>>,
    lifecycle: Lifecycle,
}

impl HeaderSyncHandler {
    pub fn new(config: HeaderSyncConfig, ctx: HandlerContext) -> Self {
        Self {
            config,
            ctx,
            listener: None,
            relay: None,
            lifecycle: Lifecycle::default(),
        }
    }
}

#[async_trait]
impl Handler for HeaderSyncHandler {
    fn name(&self) -> &'static str {
        "HeaderSync"
    }

    fn chain(&self) -> u64 {
        self.ctx.listener.chain_id
    }

    async fn init(&mut self, token: CancellationToken) -> Result<()> {
        self.lifecycle.init(&token);
        self.listener = Some(self.ctx.factory.listener(&self.ctx.listener)?);
        self.relay = Some(self.ctx.factory.relay_submitter().await?);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let (listener, relay) = match (&self.listener, &self.relay) {
            (Some(l), Some(r)) => (l.clone(), r.clone()),
            _ => return Err(not_initialized(self.name(), self.chain())),
        };
        self.lifecycle.tracker.spawn(run_header_sync(
            listener,
            relay,
            self.config.clone(),
            self.lifecycle.token.clone(),
        ));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop().await;
        Ok(())
    }
}

/// Picks the queue a scanned tx goes to.
pub type Route = fn(&Tx, u64) -> BusKey;

fn route_src(_tx: &Tx, chain_id: u64) -> BusKey {
    BusKey::src(chain_id)
}

fn route_poly(tx: &Tx, _chain_id: u64) -> BusKey {
    BusKey::poly(tx.dst_chain_id)
}

/// Scans one block and queues what it finds. Returns the number of txs.
pub async fn scan_step(
    listener: &dyn Listener,
    buses: &dyn BusFactory,
    route: Route,
    height: u64,
) -> Result<usize> {
    let txs = listener.scan(height).await?;
    for tx in &txs {
        buses.bus(route(tx, listener.chain_id()))?.push(tx).await?;
    }
    Ok(txs.len())
}

async fn run_scan(
    listener: Arc<dyn Listener>,
    buses: Arc<dyn BusFactory>,
    route: Route,
    mut height: u64,
    token: CancellationToken,
) {
    let name = chains::chain_name(listener.chain_id());
    loop {
        if token.is_cancelled() {
            info!("Tx sync of {} is exiting now", name);
            return;
        }
        let tip = match listener.latest_height().await {
            Ok(h) => h.saturating_sub(listener.defer()),
            Err(e) => {
                error!("Failed to fetch latest height of {}: {}", name, e);
                pause(&token, listener.listen_check()).await;
                continue;
            }
        };
        if height == 0 {
            height = tip;
            info!("Tx sync of {} starts from tip {}", name, height);
        }
        if height > tip {
            pause(&token, listener.listen_check()).await;
            continue;
        }
        match scan_step(listener.as_ref(), buses.as_ref(), route, height).await {
            Ok(found) => {
                if found > 0 {
                    info!("Queued {} txs from {} height {}", found, name, height);
                }
                height += 1;
            }
            Err(e) => {
                error!("Scan {} height {} error: {}", name, height, e);
                pause(&token, listener.listen_check()).await;
            }
        }
    }
}

/// Scans a chain block by block into the queues chosen by `route`.
pub struct TxSyncHandler {
    name: &'static str,
    start_height: u64,
    route: Route,
    ctx: HandlerContext,
    listener: Option<Arc<dyn Listener>>,
    lifecycle: Lifecycle,
}

impl TxSyncHandler {
    /// Source chain events into the chain's own source queue.
    pub fn src(start_height: u64, ctx: HandlerContext) -> Self {
        Self::new("SrcTxSync", start_height, route_src, ctx)
    }

    /// Relay chain commits into the destination chains' queues.
    pub fn poly(start_height: u64, ctx: HandlerContext) -> Self {
        Self::new("PolyTxSync", start_height, route_poly, ctx)
    }

    fn new(name: &'static str, start_height: u64, route: Route, ctx: HandlerContext) -> Self {
        Self {
            name,
            start_height,
            route,
            ctx,
            listener: None,
            lifecycle: Lifecycle::default(),
        }
    }
}

#[async_trait]
impl Handler for TxSyncHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn chain(&self) -> u64 {
        self.ctx.listener.chain_id
    }

    async fn init(&mut self, token: CancellationToken) -> Result<()> {
        self.lifecycle.init(&token);
        self.listener = Some(self.ctx.factory.listener(&self.ctx.listener)?);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let listener = self
            .listener
            .clone()
            .ok_or_else(|| not_initialized(self.name, self.chain()))?;
        self.lifecycle.tracker.spawn(run_scan(
            listener,
            self.ctx.buses.clone(),
            self.route,
            self.start_height,
            self.lifecycle.token.clone(),
        ));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop().await;
        Ok(())
    }
}

/// Proves a source tx and commits it to the relay chain. Permanent failures
/// drop the tx, the rest requeue it.
pub async fn commit_step(
    listener: &dyn Listener,
    relay: &dyn RelaySubmitter,
    bus: &dyn TxBus,
    mut tx: Tx,
) -> Result<Outcome> {
    let name = chains::chain_name(listener.chain_id());
    let result = async {
        listener.compose(&mut tx).await?;
        relay.commit_src_tx(&mut tx).await
    }
    .await;
    match result {
        Ok(()) => {
            info!(
                "Committed src tx {} of {} to poly, poly hash {}",
                tx.src_hash, name, tx.poly_hash
            );
            Ok(Outcome::Submitted)
        }
        Err(e) => {
            error!(
                "Commit src tx {} of {} error: {}, tx {}",
                tx.src_hash,
                name,
                e,
                tx.encode().unwrap_or_default()
            );
            if e.is_invalid_tx() {
                error!("Skipped invalid src tx {}", tx.src_hash);
                return Ok(Outcome::Skipped);
            }
            tx.attempts += 1;
            bus.push(&tx).await?;
            Ok(Outcome::Requeued(tx.attempts))
        }
    }
}

async fn run_commit(
    listener: Arc<dyn Listener>,
    relay: Arc<dyn RelaySubmitter>,
    bus: Arc<dyn TxBus>,
    settings: WorkerSettings,
    token: CancellationToken,
) {
    let name = chains::chain_name(listener.chain_id());
    loop {
        if token.is_cancelled() {
            info!("Src tx commit of {} is exiting now", name);
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
        let hash = tx.src_hash.clone();
        match commit_step(listener.as_ref(), relay.as_ref(), bus.as_ref(), tx).await {
            Ok(Outcome::Requeued(attempts)) => pause(&token, settings.retry.delay(attempts)).await,
            Ok(_) => {}
            Err(e) => error!("Failed to requeue src tx {} of {}: {}", hash, name, e),
        }
    }
}

pub struct SrcTxCommitHandler {
    ctx: HandlerContext,
    listener: Option<Arc<dyn Listener>>,
    relay: Option<Arc<dyn RelaySubmitter>>,
    bus: Option<Arc<dyn TxBus>>,
    lifecycle: Lifecycle,
}

impl SrcTxCommitHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            listener: None,
            relay: None,
            bus: None,
            lifecycle: Lifecycle::default(),
        }
    }
}

#[async_trait]
impl Handler for SrcTxCommitHandler {
    fn name(&self) -> &'static str {
        "SrcTxCommit"
    }

    fn chain(&self) -> u64 {
        self.ctx.listener.chain_id
    }

    async fn init(&mut self, token: CancellationToken) -> Result<()> {
        self.lifecycle.init(&token);
        self.listener = Some(self.ctx.factory.listener(&self.ctx.listener)?);
        self.relay = Some(self.ctx.factory.relay_submitter().await?);
        self.bus = Some(self.ctx.buses.bus(BusKey::src(self.chain()))?);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let (listener, relay, bus) = match (&self.listener, &self.relay, &self.bus) {
            (Some(l), Some(r), Some(b)) => (l.clone(), r.clone(), b.clone()),
            _ => return Err(not_initialized(self.name(), self.chain())),
        };
        self.lifecycle.tracker.spawn(run_commit(
            listener,
            relay,
            bus,
            self.ctx.settings,
            self.lifecycle.token.clone(),
        ));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop().await;
        Ok(())
    }
}

/// Delivers relay chain committed txs with one worker per managed account.
pub struct PolyTxCommitHandler {
    ctx: HandlerContext,
    submitter: Option<Arc<dyn Submitter>>,
    composer: Option<Arc<dyn PolyComposer>>,
    bus: Option<Arc<dyn TxBus>>,
    lifecycle: Lifecycle,
}

impl PolyTxCommitHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            submitter: None,
            composer: None,
            bus: None,
            lifecycle: Lifecycle::default(),
        }
    }
}

#[async_trait]
impl Handler for PolyTxCommitHandler {
    fn name(&self) -> &'static str {
        "PolyTxCommit"
    }

    fn chain(&self) -> u64 {
        self.ctx.submitter.chain_id
    }

    async fn init(&mut self, token: CancellationToken) -> Result<()> {
        self.lifecycle.init(&token);
        self.submitter = Some(self.ctx.factory.submitter(&self.ctx.submitter).await?);
        self.composer = Some(self.ctx.factory.composer()?);
        self.bus = Some(self.ctx.buses.bus(BusKey::poly(self.chain()))?);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let (submitter, composer, bus) = match (&self.submitter, &self.composer, &self.bus) {
            (Some(s), Some(c), Some(b)) => (s.clone(), c.clone(), b.clone()),
            _ => return Err(not_initialized(self.name(), self.chain())),
        };
        submitter::start(
            submitter,
            bus,
            composer,
            self.ctx.settings,
            self.lifecycle.token.clone(),
            &self.lifecycle.tracker,
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop().await;
        Ok(())
    }
}

pub fn new_handler(config: HandlerConfig, ctx: HandlerContext) -> Box<dyn Handler> {
    match config {
        HandlerConfig::HeaderSync(c) => Box::new(HeaderSyncHandler::new(c, ctx)),
        HandlerConfig::SrcTxSync(c) => Box::new(TxSyncHandler::src(c.start_height, ctx)),
        HandlerConfig::SrcTxCommit(_) => Box::new(SrcTxCommitHandler::new(ctx)),
        HandlerConfig::PolyTxSync(c) => Box::new(TxSyncHandler::poly(c.start_height, ctx)),
        HandlerConfig::PolyTxCommit(_) => Box::new(PolyTxCommitHandler::new(ctx)),
    }
}

/// Builds the enabled handlers of every configured chain, initializes them
/// all, then starts them all.
pub struct Server {
    config: Config,
    factory: Arc<dyn ChainFactory>,
    buses: Arc<dyn BusFactory>,
    token: CancellationToken,
    roles: Vec<Box<dyn Handler>>,
}

impl Server {
    pub fn new(config: Config, factory: Arc<dyn ChainFactory>, buses: Arc<dyn BusFactory>) -> Self {
        Self {
            config,
            factory,
            buses,
            token: CancellationToken::new(),
            roles: Vec::new(),
        }
    }

    /// Server over the real chain clients and the configured bus backend.
    pub fn from_config(config: Config) -> Result<Self> {
        let buses = open_bus_factory(&config.bus)?;
        let factory = Arc::new(DefaultChainFactory::new(config.poly.clone()));
        Ok(Self::new(config, factory, buses))
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn parse_handlers(&self) -> Vec<Box<dyn Handler>> {
        let settings = WorkerSettings::from(&self.config.relayer);
        let context = |listener: ListenerConfig, submitter: SubmitterConfig| HandlerContext {
            listener,
            submitter,
            factory: self.factory.clone(),
            buses: self.buses.clone(),
            settings,
        };

        let mut roles = Vec::new();
        for conf in self.config.poly.handlers() {
            if conf.enabled() {
                let ctx = context(self.config.poly.listener_config(), SubmitterConfig::default());
                roles.push(new_handler(conf, ctx));
            }
        }
        for chain in &self.config.chains {
            for conf in chain.handlers() {
                if !conf.enabled() {
                    continue;
                }
                let ctx = context(
                    chain.listener_config(),
                    chain.submitter_config(self.config.poly.chain_id),
                );
                roles.push(new_handler(conf, ctx));
            }
        }
        roles
    }

    pub async fn start(&mut self) -> Result<()> {
        let mut roles = self.parse_handlers();
        if roles.is_empty() {
            warn!("No handler enabled in config");
        }
        let total = roles.len();
        for (i, role) in roles.iter_mut().enumerate() {
            info!(
                "Initializing role {}/{} {} for {}",
                i + 1,
                total,
                role.name(),
                chains::chain_name(role.chain())
            );
            role.init(self.token.clone()).await?;
        }
        for (i, role) in roles.iter_mut().enumerate() {
            info!(
                "Starting role {}/{} {} for {}",
                i + 1,
                total,
                role.name(),
                chains::chain_name(role.chain())
            );
            role.start()?;
        }
        self.roles = roles;
        Ok(())
    }

    /// Cancels every handler and waits for all of their tasks.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping relayer...");
        self.token.cancel();
        for role in &self.roles {
            role.stop().await?;
        }
        Ok(())
    }
}

/// Looks up one source tx and queues it as if it had just been scanned.
pub async fn replay(
    config: &Config,
    factory: &dyn ChainFactory,
    buses: &dyn BusFactory,
    chain_id: u64,
    hash: &str,
) -> Result<Tx> {
    let (listener_config, route): (ListenerConfig, Route) = if chain_id == chains::POLY {
        (config.poly.listener_config(), route_poly)
    } else {
        let chain = config
            .get_chain_config(chain_id)
            .ok_or_else(|| Error::Config(format!("Chain config not found: {}", chain_id)))?;
        (chain.listener_config(), route_src)
    };
    let listener = factory.listener(&listener_config)?;
    let tx = listener.scan_tx(hash).await?;
    let key = route(&tx, chain_id);
    buses.bus(key)?.push(&tx).await?;
    info!("Queued tx {} of {} onto {}", hash, chains::chain_name(chain_id), key);
    Ok(tx)
}
