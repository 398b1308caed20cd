use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// `--ui` choice: `auto` picks spinners only when stderr is a terminal
/// nobody else is writing to, `pretty` forces them on a terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(str::trim) {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

/// Stage reporting on stderr: a spinner per stage, or plain `==>` lines.
#[derive(Clone, Debug)]
pub struct Ui {
    spinners: bool,
}

impl Ui {
    /// `shared_terminal` is set when logs or frame reports also land on the
    /// terminal while a stage runs; spinners would tear those lines.
    pub fn from_args(ui_flag: Option<&str>, stderr_is_tty: bool, shared_terminal: bool) -> Self {
        let spinners = stderr_is_tty
            && match UiMode::from_flag(ui_flag) {
                UiMode::Pretty => true,
                UiMode::Auto => !shared_terminal,
                UiMode::Plain => false,
            };
        Self { spinners }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.spinners {
            Some(spinner(name))
        } else {
            eprintln!("==> {}", name);
            None
        };
        StageGuard {
            name: name.to_string(),
            detail: None,
            start: Instant::now(),
            spinner,
        }
    }
}

fn spinner(name: &str) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(format!("{name}…"));
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Prints the stage's finish line, with detail and elapsed time, on drop.
pub struct StageGuard {
    name: String,
    detail: Option<String>,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    pub fn detail(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!("{}… {}", self.name, detail));
        }
        self.detail = Some(detail);
    }

    fn finish_line(&self) -> String {
        let elapsed = self.start.elapsed();
        let elapsed = if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        };
        match &self.detail {
            Some(detail) => format!("✔ {}: {} ({})", self.name, detail, elapsed),
            None => format!("✔ {} ({})", self.name, elapsed),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let line = self.finish_line();
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{line}"),
        }
    }
}
