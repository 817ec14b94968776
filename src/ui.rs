use crate::client::AppSnapshot;
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use dsic_client::{
    SessionState,
    actions::{
        Action,
        ActionKind,
        AppVariant,
    },
    units::parse_amount,
};
use futures::StreamExt;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;

pub type InputEventReceiver = EventStream;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Redraw,
    Connect,
    Refresh,
    ClearErrors,
    Submit(Action),
    Rejected(Action),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    AmountInput(AmountState),
    GuessInput(GuessState),
    Confirm(Action),
    QuitModal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct AmountState {
    kind: ActionKind,
    input: String,
    error: Option<String>,
}

impl AmountState {
    fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            input: String::new(),
            error: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct GuessState {
    input: String,
}

#[derive(Default)]
pub struct UiState {
    mode: Mode,
    variant: AppVariant,
    actions_enabled: bool,
    last_snapshot: Option<AppSnapshot>,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    match events.next().await {
        Some(Ok(event)) => Ok(event),
        Some(Err(e)) => Err(e.into()),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

/// Hand the terminal back for an interactive password prompt.
pub fn terminal_suspend() -> Result<()> {
    terminal_exit()
}

pub fn terminal_resume(state: &mut UiState) -> Result<()> {
    terminal_enter(state)?;
    if let Some(term) = state.terminal.as_mut() {
        term.clear()?;
    }
    if let Some(snapshot) = state.last_snapshot.clone() {
        draw(state, &snapshot)?;
    }
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    state.variant = snap.variant;
    state.actions_enabled = snap.actions_enabled;
    // a modal opened before the action became unavailable is closed
    if !snap.actions_enabled
        && matches!(state.mode, Mode::AmountInput(_) | Mode::GuessInput(_))
    {
        state.mode = Mode::Normal;
    }
    state.last_snapshot = Some(snap.clone());
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

fn action_key(variant: AppVariant, code: KeyCode) -> Option<ActionKind> {
    let kind = match code {
        KeyCode::Char('d') => ActionKind::Deposit,
        KeyCode::Char('w') => ActionKind::Withdraw,
        KeyCode::Char('x') => ActionKind::ClaimReturns,
        KeyCode::Char('p') => ActionKind::PlayGame,
        KeyCode::Char('t') => ActionKind::ClaimTokens,
        _ => return None,
    };
    variant.actions().contains(&kind).then_some(kind)
}

/// Translate a terminal event into an app event, updating modal state along the way.
pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let key = match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => key,
        Event::Resize(_, _) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }

    if state.mode == Mode::Normal {
        return interpret_normal(state, key);
    }
    match &mut state.mode {
        Mode::Normal => None,
        Mode::QuitModal => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                Some(UserEvent::Quit)
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Confirm(action) => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                let action = action.clone();
                state.mode = Mode::Normal;
                Some(UserEvent::Submit(action))
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                let action = action.clone();
                state.mode = Mode::Normal;
                Some(UserEvent::Rejected(action))
            }
            _ => None,
        },
        Mode::AmountInput(amount) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Backspace => {
                amount.input.pop();
                amount.error = None;
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => {
                amount.input.push(c);
                amount.error = None;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                match parse_amount(&amount.input) {
                    Ok(value) => {
                        let action = match amount.kind {
                            ActionKind::Withdraw => Action::Withdraw { amount: value },
                            _ => Action::Deposit { amount: value },
                        };
                        state.mode = Mode::Confirm(action);
                    }
                    Err(e) => amount.error = Some(e.to_string()),
                }
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::GuessInput(guess) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Backspace => {
                guess.input.pop();
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) if c.is_ascii_digit() => {
                if guess.input.len() < 19 {
                    guess.input.push(c);
                }
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                if let Ok(value) = guess.input.parse::<u64>() {
                    state.mode = Mode::Confirm(Action::PlayGame { guess: value });
                }
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
    }
}

fn interpret_normal(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('c') => Some(UserEvent::Connect),
        KeyCode::Char('r') => Some(UserEvent::Refresh),
        KeyCode::Char('e') => Some(UserEvent::ClearErrors),
        code => {
            if !state.actions_enabled {
                return None;
            }
            let kind = action_key(state.variant, code)?;
            match kind {
                ActionKind::Deposit | ActionKind::Withdraw => {
                    state.mode = Mode::AmountInput(AmountState::new(kind));
                }
                ActionKind::PlayGame => {
                    state.mode = Mode::GuessInput(GuessState::default());
                }
                ActionKind::ClaimReturns => {
                    state.mode = Mode::Confirm(Action::ClaimReturns);
                }
                ActionKind::ClaimTokens => {
                    state.mode = Mode::Confirm(Action::ClaimTokens);
                }
            }
            Some(UserEvent::Redraw)
        }
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(f.area());

    draw_account_panel(f, chunks[0], snap);
    draw_mirror_panel(f, chunks[1], snap);
    draw_status(f, chunks[2], snap);
    draw_help(f, chunks[3], snap);
    draw_modals(f, state);
}

fn draw_account_panel(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let account = match snap.session {
        SessionState::Authorized(account) => format!("{account:?}"),
        SessionState::ProviderDetected => "not connected".to_string(),
        SessionState::Uninitialized => "no wallet".to_string(),
    };
    let lines = vec![
        Line::from(format!("Your Account: {account}")),
        Line::from(format!("Contract: {}", snap.contract)),
        Line::from(format!("Network: {}", snap.network)),
    ];
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(snap.title));
    f.render_widget(widget, area);
}

fn draw_mirror_panel(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines: Vec<Line> = snap
        .mirror
        .iter()
        .map(|row| {
            Line::from(vec![
                Span::raw(format!("{}: ", row.label)),
                Span::styled(
                    row.value.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
            ])
        })
        .collect();
    if lines.is_empty() {
        lines.push(Line::from("Connect your wallet to load the dashboard"));
    }
    let mut title = match &snap.refreshed_at {
        Some(at) => format!("Dashboard (as of {at})"),
        None => "Dashboard".to_string(),
    };
    if snap.mirror_stale {
        title.push_str(" [stale, press r]");
    }
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let widget = if snap.errors.is_empty() {
        let text = if snap.status.trim().is_empty() {
            "Ready".to_string()
        } else {
            snap.status.clone()
        };
        Paragraph::new(text)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .style(Style::default().fg(Color::Green))
    } else {
        let mut lines: Vec<Line> = Vec::new();
        if !snap.status.trim().is_empty() {
            lines.push(Line::from(snap.status.clone()));
        }
        // newest first, the panel only fits a few
        for e in snap.errors.iter().rev() {
            lines.push(Line::from(e.clone()));
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Errors"))
            .style(Style::default().fg(Color::Red))
    };
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut parts: Vec<&str> = Vec::new();
    if snap.connect_enabled {
        parts.push("c connect");
    }
    if snap.actions_enabled {
        match snap.variant {
            AppVariant::SavingsClub => {
                parts.extend(["d deposit", "w withdraw", "x claim returns"])
            }
            AppVariant::GuessingGame => parts.extend(["p play", "t claim tokens"]),
        }
        parts.push("r refresh");
    } else if snap.busy {
        parts.push("waiting for transaction...");
    }
    parts.extend(["e clear errors", "q/Esc quit"]);
    let help = Paragraph::new(parts.join(" | "))
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    let (title, lines) = match &state.mode {
        Mode::Normal => return,
        Mode::QuitModal => (
            "Quit",
            vec![Line::from("Quit the app? (y/n)")],
        ),
        Mode::Confirm(action) => (
            "Confirm transaction",
            vec![
                Line::from(action.describe()),
                Line::from(""),
                Line::from("Sign and send? (y/n)"),
            ],
        ),
        Mode::AmountInput(amount) => {
            let verb = match amount.kind {
                ActionKind::Withdraw => "Withdraw",
                _ => "Deposit",
            };
            let mut lines = vec![
                Line::from(format!("{verb} amount (ETH): {}_", amount.input)),
                Line::from("Enter to continue, Esc to cancel"),
            ];
            if let Some(error) = &amount.error {
                lines.push(Line::styled(error.clone(), Style::default().fg(Color::Red)));
            }
            ("Amount", lines)
        }
        Mode::GuessInput(guess) => (
            "Play",
            vec![
                Line::from(format!("Your guess: {}_", guess.input)),
                Line::from("The current game cost is attached automatically"),
                Line::from("Enter to continue, Esc to cancel"),
            ],
        ),
    };
    let area = centered_rect(50, 30, f.area());
    f.render_widget(Clear, area);
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use dsic_client::test_helpers::ether;

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn enabled(variant: AppVariant) -> UiState {
        UiState {
            variant,
            actions_enabled: true,
            ..UiState::default()
        }
    }

    fn type_text(state: &mut UiState, text: &str) {
        for c in text.chars() {
            interpret_event(state, press(KeyCode::Char(c)));
        }
    }

    #[test]
    fn interpret_event__deposit_flow_ends_in_submit() {
        // given
        let mut state = enabled(AppVariant::SavingsClub);

        // when
        interpret_event(&mut state, press(KeyCode::Char('d')));
        type_text(&mut state, "1.5");
        interpret_event(&mut state, press(KeyCode::Enter));
        let event = interpret_event(&mut state, press(KeyCode::Char('y')));

        // then
        assert_eq!(
            event,
            Some(UserEvent::Submit(Action::Deposit {
                amount: ether("1.5")
            }))
        );
        assert_eq!(state.mode, Mode::Normal);
    }

    #[test]
    fn interpret_event__declining_confirmation_is_rejection() {
        // given
        let mut state = enabled(AppVariant::SavingsClub);
        interpret_event(&mut state, press(KeyCode::Char('x')));

        // when
        let event = interpret_event(&mut state, press(KeyCode::Char('n')));

        // then
        assert_eq!(event, Some(UserEvent::Rejected(Action::ClaimReturns)));
    }

    #[test]
    fn interpret_event__invalid_amount_stays_in_modal() {
        // given
        let mut state = enabled(AppVariant::SavingsClub);
        interpret_event(&mut state, press(KeyCode::Char('w')));

        // when
        interpret_event(&mut state, press(KeyCode::Enter));

        // then
        let Mode::AmountInput(amount) = &state.mode else {
            panic!("expected amount modal, got {:?}", state.mode);
        };
        assert!(amount.error.is_some());
    }

    #[test]
    fn interpret_event__action_keys_ignored_while_disabled() {
        // given
        let mut state = UiState::default();

        // when
        let event = interpret_event(&mut state, press(KeyCode::Char('d')));

        // then
        assert_eq!(event, None);
        assert_eq!(state.mode, Mode::Normal);
    }

    #[test]
    fn interpret_event__game_keys_only_in_game_variant() {
        // given
        let mut club = enabled(AppVariant::SavingsClub);
        let mut game = enabled(AppVariant::GuessingGame);

        // when
        let club_event = interpret_event(&mut club, press(KeyCode::Char('p')));
        interpret_event(&mut game, press(KeyCode::Char('p')));
        type_text(&mut game, "42");
        interpret_event(&mut game, press(KeyCode::Enter));
        let game_event = interpret_event(&mut game, press(KeyCode::Enter));

        // then
        assert_eq!(club_event, None);
        assert_eq!(
            game_event,
            Some(UserEvent::Submit(Action::PlayGame { guess: 42 }))
        );
    }

    #[test]
    fn interpret_event__quit_needs_confirmation() {
        let mut state = UiState::default();
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('q'))),
            Some(UserEvent::Redraw)
        );
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('y'))),
            Some(UserEvent::Quit)
        );
    }
}
