// src/ui.rs
// Terminal console: spinner, download bar, colored markers and the overwrite prompt.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::PackError;
use crate::pipeline::{Console, Stage};
use crate::tool::builder::Stream;
use crate::tool::download::DownloadProgress;

pub struct TerminalConsole {
    spinner: ProgressBar,
    download: Option<ProgressBar>,
    /// Answer "yes" without asking.
    assume_yes: bool,
}

impl TerminalConsole {
    pub fn new(assume_yes: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.blue} {elapsed_precise} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        TerminalConsole {
            spinner,
            download: None,
            assume_yes,
        }
    }

    fn finish_download(&mut self) {
        if let Some(pb) = self.download.take() {
            pb.finish_with_message("Download complete");
        }
    }

    fn println(&self, line: String) {
        self.spinner.suspend(|| println!("{line}"));
    }

    fn eprintln(&self, line: String) {
        self.spinner.suspend(|| eprintln!("{line}"));
    }
}

impl Console for TerminalConsole {
    fn stage(&mut self, stage: Stage) {
        self.finish_download();
        match stage {
            Stage::Success => self.spinner.finish_and_clear(),
            Stage::Failed => self.spinner.abandon(),
            Stage::Init => {
                self.spinner.enable_steady_tick(Duration::from_millis(120));
                self.spinner.set_message(stage.to_string());
            }
            _ => self.spinner.set_message(stage.to_string()),
        }
    }

    fn info(&mut self, message: &str) {
        self.println(message.green().to_string());
    }

    fn warn(&mut self, message: &str) {
        self.eprintln(format!("{} {}", "WARNING".bold().yellow(), message));
    }

    fn error(&mut self, error: &PackError) {
        self.eprintln(format!(
            "{} [{}] {}",
            "ERROR".bold().red().on_black(),
            error.kind(),
            error
        ));
    }

    fn progress(&mut self, progress: &DownloadProgress) {
        let pb = self.download.get_or_insert_with(|| {
            let pb = ProgressBar::new(progress.total.unwrap_or(0));
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({msg})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        });
        pb.set_position(progress.downloaded);
        let rate = format!("{}/s", indicatif::HumanBytes(progress.bytes_per_sec as u64));
        match progress.percent() {
            Some(pct) => pb.set_message(format!("{pct:.0}%, {rate}")),
            None => pb.set_message(rate),
        }
    }

    fn output(&mut self, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => self.println(format!("{} {}", "stdout".on_black(), line)),
            Stream::Stderr => self.eprintln(format!("{} {}", "stderr".on_black(), line)),
        }
    }

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        if self.assume_yes {
            self.println(format!("{question}? {}", "yes".bold()));
            return Ok(true);
        }
        self.spinner.suspend(|| ask_yes_no(question, true, &mut io::stdin().lock(), &mut io::stdout()))
    }
}

/// Asks until the answer is recognisable. Empty input takes `default`; EOF declines.
pub fn ask_yes_no<R: BufRead, W: Write>(
    question: &str,
    default: bool,
    input: &mut R,
    out: &mut W,
) -> io::Result<bool> {
    let hint = if default { "Y/n" } else { "y/N" };
    loop {
        write!(out, "{} {} ({}) ", "?".green().bold(), question.bold(), hint)?;
        out.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            writeln!(out)?;
            return Ok(false);
        }
        match answer.trim().to_ascii_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(out, "{}", "Please answer yes or no.".red())?,
        }
    }
}
