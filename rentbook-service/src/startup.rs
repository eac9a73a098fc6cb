//! Application assembly: store connection, service wiring and the HTTP
//! listener.

use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::{Config, StoreBackend};
use crate::router;
use crate::services::{
    InMemoryLedgerStore, LedgerStore, ManualPaymentService, MessagingProvider, MobileMoneyClient,
    MockMessagingProvider, MongoLedgerStore, PaymentGateway, PaymentInitiationService,
    ReceiptNotifier, ReconciliationEngine, VerificationScheduler, WhatsAppProvider,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn LedgerStore>,
    pub engine: ReconciliationEngine,
    pub initiation: PaymentInitiationService,
    pub manual: ManualPaymentService,
    pub scheduler: VerificationScheduler,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

/// Open the configured ledger store.
pub async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory ledger store; data is lost on restart");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        StoreBackend::Mongo => {
            let database = config
                .store
                .database
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("database settings missing for mongo backend"))?;

            let mut client_options = ClientOptions::parse(database.url.expose_secret()).await?;
            client_options.app_name = Some(config.service_name.clone());

            let client = Client::with_options(client_options)?;
            let db = client.database(&database.db_name);

            let store = MongoLedgerStore::new(&db);
            store.init_indexes().await?;
            Ok(Arc::new(store))
        }
    }
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let store = connect_store(&config).await?;

        let gateway = MobileMoneyClient::new(config.gateway.clone())?;
        if gateway.is_configured() {
            tracing::info!("Mobile-money gateway client initialized");
        } else {
            tracing::warn!(
                "Mobile-money gateway credentials not configured - initiation will be refused"
            );
        }

        let messaging: Arc<dyn MessagingProvider> = if config.messaging.enabled {
            Arc::new(WhatsAppProvider::new(config.messaging.clone()))
        } else {
            tracing::info!("WhatsApp receipts disabled");
            Arc::new(MockMessagingProvider::new())
        };

        Self::build_with(config, store, Arc::new(gateway), messaging).await
    }

    /// Build against explicit collaborators; used by tests to inject the
    /// in-memory store and mock providers.
    pub async fn build_with(
        config: Config,
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        messaging: Arc<dyn MessagingProvider>,
    ) -> anyhow::Result<Self> {
        let scheduler = VerificationScheduler::new();
        let notifier = ReceiptNotifier::new(messaging, &config.messaging);
        let engine = ReconciliationEngine::new(
            store.clone(),
            gateway.clone(),
            scheduler.clone(),
            notifier,
        );
        let initiation = PaymentInitiationService::new(
            store.clone(),
            gateway,
            engine.clone(),
            scheduler.clone(),
            config.gateway.clone(),
            config.payments.clone(),
        );
        let manual = ManualPaymentService::new(
            store.clone(),
            config.payments.public_manual_payments_enabled,
            config.payments.receipt_max_attempts,
        );

        if config.payments.public_manual_payments_enabled {
            tracing::warn!(
                "Public manual payments are enabled: POST /public/leases/:id/payments accepts unauthenticated requests"
            );
        }
        if config.gateway.callback_token.is_none() {
            tracing::warn!("GATEWAY_CALLBACK_TOKEN not set - gateway callbacks are unauthenticated");
        }

        let state = AppState {
            config: config.clone(),
            store,
            engine,
            initiation,
            manual,
            scheduler,
        };

        // Port 0 binds a random port for tests.
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        tracing::info!("Rentbook service: HTTP on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let scheduler = self.state.scheduler.clone();
        let router = router(self.state);

        let result = axum::serve(self.listener, router).await;
        scheduler.cancel_all();
        result?;

        Ok(())
    }
}
