use crate::ui;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::DeploymentStore;
use dsic_client::{
    ClientError,
    ContractClient,
    InclusionPolicy,
    InterfaceDescription,
    MirrorField,
    SessionManager,
    SessionState,
    SigningProvider,
    actions::{
        Action,
        ActionKind,
        AppVariant,
    },
    config::{
        AppConfig,
        WalletConfig,
    },
    contract::{
        Receipt,
        TxProgress,
    },
    keystore::{
        KeystoreProvider,
        PasswordSource,
    },
    units::format_amount,
    wallets,
};
use tracing::{
    error,
    info,
    warn,
};

const MAX_ERRORS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorRow {
    pub label: &'static str,
    pub value: String,
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub title: &'static str,
    pub variant: AppVariant,
    pub network: String,
    pub contract: String,
    pub session: SessionState,
    pub mirror: Vec<MirrorRow>,
    pub mirror_stale: bool,
    pub refreshed_at: Option<String>,
    pub status: String,
    pub errors: Vec<String>,
    pub connect_enabled: bool,
    pub actions_enabled: bool,
    pub busy: bool,
}

pub struct AppController<P> {
    session: SessionManager<P>,
    contract: Option<ContractClient<P>>,
    interface: std::result::Result<InterfaceDescription, ClientError>,
    contract_address: String,
    variant: AppVariant,
    policy: InclusionPolicy,
    network: String,
    pub status: String,
    pub errors: Vec<String>,
}

impl<P: SigningProvider> AppController<P> {
    pub fn new(
        provider: Option<P>,
        interface: std::result::Result<InterfaceDescription, ClientError>,
        contract_address: impl Into<String>,
        variant: AppVariant,
        policy: InclusionPolicy,
        network: impl Into<String>,
    ) -> Self {
        Self {
            session: SessionManager::new(provider),
            contract: None,
            interface,
            contract_address: contract_address.into(),
            variant,
            policy,
            network: network.into(),
            status: String::new(),
            errors: Vec::new(),
        }
    }

    /// Detect the provider. Without one the app shows a single message and stays disabled.
    pub fn start(&mut self) {
        match self.session.detect_provider() {
            Ok(_) => self.set_status("Wallet detected. Press c to connect."),
            Err(e) => {
                self.set_status("");
                self.push_errors(vec![e.to_string()]);
            }
        }
    }

    pub fn connect_enabled(&self) -> bool {
        self.session.state() == SessionState::ProviderDetected
    }

    pub fn actions_enabled(&self) -> bool {
        self.contract.as_ref().is_some_and(|c| !c.is_busy())
    }

    pub fn action_enabled(&self, kind: ActionKind) -> bool {
        self.actions_enabled() && self.variant.actions().contains(&kind)
    }

    /// Authorize, bind and load the dashboard once.
    pub async fn connect(&mut self) {
        if !self.connect_enabled() || self.contract.is_some() {
            return;
        }
        self.set_status("Connecting to wallet...");
        let authorized = self.session.request_authorization().await;
        if let Err(e) = authorized {
            self.fail("Connect", e);
            return;
        }
        match self.bind() {
            Ok(contract) => {
                self.contract = Some(contract);
                self.refresh().await;
            }
            Err(e) => self.fail("Connect", e),
        }
    }

    fn bind(&self) -> std::result::Result<ContractClient<P>, ClientError> {
        let authorization = self.session.authorization()?;
        let interface = self.interface.clone()?;
        Ok(
            ContractClient::bind(&self.contract_address, interface, &authorization)?
                .with_policy(self.policy.clone()),
        )
    }

    pub async fn refresh(&mut self) {
        let Some(contract) = self.contract.as_ref() else {
            return;
        };
        let refreshed = contract.refresh_mirror().await;
        match refreshed {
            Ok(_) => self.set_status("Dashboard refreshed"),
            Err(e) => self.fail("Refresh", e),
        }
    }

    pub async fn run_action(
        &mut self,
        action: &Action,
        mut on_progress: impl FnMut(String),
    ) -> Option<Receipt> {
        if self.session.state() == SessionState::Uninitialized {
            return None;
        }
        let description = action.describe();
        let result = match self.contract.as_ref() {
            Some(contract) if self.variant.actions().contains(&action.kind()) => {
                action
                    .run(contract, |progress| {
                        on_progress(progress_message(&description, &progress))
                    })
                    .await
            }
            Some(_) => Err(ClientError::UnknownMethod(format!("{:?}", action.kind()))),
            None => Err(ClientError::NotAuthorized),
        };
        match result {
            Ok(receipt) => {
                let block = receipt
                    .block_number
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "?".to_string());
                self.set_status(format!("{description} confirmed in block {block}"));
                let stale = self.contract.as_ref().is_some_and(|c| c.mirror().is_stale());
                if stale {
                    warn!(action = %description, "dashboard not refreshed after confirmation");
                    self.push_errors(vec![format!(
                        "{description}: confirmed, but the dashboard could not be refreshed (press r)"
                    )]);
                }
                Some(receipt)
            }
            Err(e) => {
                self.fail(&description, e);
                None
            }
        }
    }

    /// The user declined in the confirmation prompt.
    pub fn record_rejection(&mut self, action: &Action) {
        self.fail(&action.describe(), ClientError::UserRejected);
    }

    fn fail(&mut self, what: &str, err: ClientError) {
        error!(error = %err, action = what, "action failed");
        self.set_status(format!("{what} failed"));
        self.push_errors(vec![format!("{what}: {err}")]);
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn snapshot(&self) -> AppSnapshot {
        let mirror = self.contract.as_ref().map(|c| c.mirror());
        let rows = mirror
            .as_ref()
            .map(|m| {
                m.values()
                    .map(|(field, value)| MirrorRow {
                        label: field.label(),
                        value: format_field(field, value),
                    })
                    .collect()
            })
            .unwrap_or_default();
        AppSnapshot {
            title: self.variant.title(),
            variant: self.variant,
            network: self.network.clone(),
            contract: self.contract_address.clone(),
            session: self.session.state(),
            mirror: rows,
            mirror_stale: mirror.as_ref().is_some_and(|m| m.is_stale()),
            refreshed_at: mirror
                .as_ref()
                .and_then(|m| m.refreshed_at())
                .map(|t| t.format("%H:%M:%S UTC").to_string()),
            status: self.status.clone(),
            errors: self.errors.clone(),
            connect_enabled: self.connect_enabled(),
            actions_enabled: self.actions_enabled(),
            busy: self.contract.as_ref().is_some_and(|c| c.is_busy()),
        }
    }
}

fn format_field(field: MirrorField, value: ethers::types::U256) -> String {
    if field.is_ether() {
        format!("{} ETH", format_amount(value))
    } else {
        value.to_string()
    }
}

fn progress_message(description: &str, progress: &TxProgress) -> String {
    match progress {
        TxProgress::Submitted { hash } => {
            format!("{description}: submitted {hash:?}, waiting for inclusion...")
        }
        TxProgress::Confirmed { block, .. } => format!(
            "{description}: included in block {}, refreshing...",
            block.map(|b| b.to_string()).unwrap_or_else(|| "?".to_string())
        ),
        TxProgress::Refreshed(_) => format!("{description}: dashboard refreshed"),
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let store = DeploymentStore::new(config.network.env())
        .map_err(|e| eyre!(e))
        .wrap_err("Opening deployment store")?;
    let address = config.resolve_contract_address(Some(&store))?;

    let WalletConfig::Keystore { name, dir } = &config.wallet;
    let descriptor = wallets::select_wallet(dir, name.as_deref())?;
    let password = PasswordSource::from_env();
    let prompts_for_password = matches!(password, PasswordSource::Prompt);
    let provider =
        KeystoreProvider::detect(config.network.url(), descriptor, password).await?;

    let interface = InterfaceDescription::load(&config.abi_path);
    let mut controller = AppController::new(
        provider,
        interface,
        address,
        config.variant,
        config.policy.clone(),
        config.network.url(),
    );
    controller.start();

    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(
        controller,
        &mut ui_state,
        &mut input_events,
        prompts_for_password,
    )
    .await;
    ui::terminal_exit()?;
    res
}

fn show_processing_status<P: SigningProvider>(
    controller: &mut AppController<P>,
    ui_state: &mut ui::UiState,
    message: impl Into<String>,
    context: &'static str,
) -> Result<AppSnapshot> {
    controller.set_status(message);
    let snapshot = controller.snapshot();
    ui::draw(ui_state, &snapshot).wrap_err(context)?;
    Ok(snapshot)
}

async fn run_loop<P: SigningProvider>(
    mut controller: AppController<P>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    prompts_for_password: bool,
) -> Result<()> {
    info!("Running app loop");
    ui::draw(ui_state, &controller.snapshot()).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::ClearErrors => controller.clear_errors(),
                    ui::UserEvent::Connect => {
                        if !controller.connect_enabled() {
                            continue;
                        }
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Unlocking wallet...",
                            "draw while connecting failed",
                        )?;
                        if prompts_for_password {
                            ui::terminal_suspend()?;
                        }
                        controller.connect().await;
                        if prompts_for_password {
                            ui::terminal_resume(ui_state)?;
                            *input_events = ui::input_event_stream();
                        }
                    }
                    ui::UserEvent::Refresh => {
                        if !controller.actions_enabled() {
                            continue;
                        }
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Refreshing...",
                            "draw while refreshing failed",
                        )?;
                        controller.refresh().await;
                    }
                    ui::UserEvent::Rejected(action) => controller.record_rejection(&action),
                    ui::UserEvent::Submit(action) => {
                        if !controller.action_enabled(action.kind()) {
                            continue;
                        }
                        let mut snapshot = show_processing_status(
                            &mut controller,
                            ui_state,
                            format!("{}: waiting for signature...", action.describe()),
                            "draw while submitting failed",
                        )?;
                        let mut draw_failure = None;
                        controller
                            .run_action(&action, |message| {
                                snapshot.status = message;
                                snapshot.busy = true;
                                if let Err(e) = ui::draw(ui_state, &snapshot) {
                                    draw_failure.get_or_insert(e);
                                }
                            })
                            .await;
                        if let Some(e) = draw_failure {
                            return Err(e).wrap_err("draw while awaiting inclusion failed");
                        }
                    }
                }
                ui::draw(ui_state, &controller.snapshot())
                    .wrap_err("draw after event failed")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use dsic_client::test_helpers::{
        DEFAULT_CONTRACT,
        FakeChain,
        account,
        club_interface,
        ether,
        fast_policy,
    };

    fn controller(chain: Option<FakeChain>) -> AppController<FakeChain> {
        AppController::new(
            chain,
            Ok(club_interface()),
            DEFAULT_CONTRACT,
            AppVariant::SavingsClub,
            fast_policy(),
            "http://127.0.0.1:8545",
        )
    }

    fn mirror_value(snapshot: &AppSnapshot, label: &str) -> Option<String> {
        snapshot
            .mirror
            .iter()
            .find(|row| row.label == label)
            .map(|row| row.value.clone())
    }

    #[tokio::test]
    async fn start__absent_provider_shows_one_message_and_disables_everything() {
        // given
        let mut controller = controller(None);

        // when
        controller.start();
        controller.connect().await;
        let receipt = controller
            .run_action(&Action::ClaimReturns, |_| {})
            .await;

        // then
        let snapshot = controller.snapshot();
        assert!(receipt.is_none());
        assert!(!snapshot.connect_enabled);
        assert!(!snapshot.actions_enabled);
        assert_eq!(
            snapshot.errors.first().map(String::as_str),
            Some(ClientError::ProviderAbsent.to_string().as_str())
        );
        assert_eq!(
            snapshot
                .errors
                .iter()
                .filter(|e| e.contains("No signing provider"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn connect__loads_dashboard() {
        // given
        let mut controller =
            controller(Some(FakeChain::savings_club(account(1), ether("2.0"))));
        controller.start();

        // when
        controller.connect().await;

        // then
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.session, SessionState::Authorized(account(1)));
        assert!(snapshot.actions_enabled);
        assert_eq!(
            mirror_value(&snapshot, "Total Balance"),
            Some("2.0 ETH".to_string())
        );
        assert!(snapshot.errors.is_empty());
    }

    #[tokio::test]
    async fn run_action__deposit_updates_dashboard_and_reports_progress() {
        // given
        let mut controller =
            controller(Some(FakeChain::savings_club(account(1), ether("2.0"))));
        controller.start();
        controller.connect().await;
        let mut messages = Vec::new();

        // when
        let receipt = controller
            .run_action(
                &Action::Deposit {
                    amount: ether("1.0"),
                },
                |m| messages.push(m),
            )
            .await;

        // then
        let snapshot = controller.snapshot();
        assert!(receipt.is_some());
        assert_eq!(messages.len(), 3);
        assert_eq!(
            mirror_value(&snapshot, "Total Balance"),
            Some("3.0 ETH".to_string())
        );
        assert_eq!(
            mirror_value(&snapshot, "Your Contribution"),
            Some("1.0 ETH".to_string())
        );
        assert!(snapshot.status.starts_with("Deposit 1.0 ETH confirmed"));
    }

    #[tokio::test]
    async fn run_action__revert_surfaces_error_and_keeps_dashboard() {
        // given
        let mut controller =
            controller(Some(FakeChain::savings_club(account(1), ether("2.0"))));
        controller.start();
        controller.connect().await;
        let before = controller.snapshot().mirror;

        // when
        let receipt = controller
            .run_action(
                &Action::Withdraw {
                    amount: ether("1.0"),
                },
                |_| {},
            )
            .await;

        // then
        let snapshot = controller.snapshot();
        assert!(receipt.is_none());
        assert_eq!(snapshot.mirror, before);
        assert_eq!(snapshot.errors.len(), 1);
        assert!(snapshot.errors[0].contains("reverted"));
        assert!(snapshot.actions_enabled);
    }

    #[tokio::test]
    async fn run_action__failed_refresh_after_confirmation_is_reported() {
        // given
        let mut controller =
            controller(Some(FakeChain::savings_club(account(1), ether("2.0"))));
        controller.start();
        controller.connect().await;
        let chain = controller.session.detect_provider().unwrap();
        chain.fail_next_calls(1);

        // when
        let receipt = controller
            .run_action(
                &Action::Deposit {
                    amount: ether("1.0"),
                },
                |_| {},
            )
            .await;

        // then
        let snapshot = controller.snapshot();
        assert!(receipt.is_some());
        assert!(snapshot.status.starts_with("Deposit 1.0 ETH confirmed"));
        assert!(snapshot.mirror_stale);
        assert_eq!(snapshot.errors.len(), 1);
        assert!(snapshot.errors[0].contains("could not be refreshed"));
        assert_eq!(
            mirror_value(&snapshot, "Total Balance"),
            Some("2.0 ETH".to_string())
        );
    }

    #[tokio::test]
    async fn record_rejection__reports_user_rejected() {
        let mut controller =
            controller(Some(FakeChain::savings_club(account(1), ether("2.0"))));
        controller.start();
        controller.connect().await;

        controller.record_rejection(&Action::ClaimReturns);

        assert_eq!(
            controller.errors,
            vec![format!("Claim returns: {}", ClientError::UserRejected)]
        );
    }

    #[test]
    fn push_errors__keeps_latest_fifty() {
        let mut controller = controller(None);
        controller.push_errors((0..60).map(|i| i.to_string()).collect());
        assert_eq!(controller.errors.len(), 50);
        assert_eq!(controller.errors[0], "10");
    }
}
