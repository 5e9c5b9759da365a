//! Terminal output for pipeline runs
//!
//! `TerminalOutput` consumes engine events and renders them: one line per
//! event, a step progress bar while steps run, and the tail of a failing
//! step's output between separators.

use crate::cli::output::{create_progress_bar, format_execution_event, format_output};
use crate::execution::ExecutionEvent;
use console::style;
use indicatif::ProgressBar;
use std::sync::Mutex;

/// Renders execution events to the terminal
pub struct TerminalOutput {
    /// Lines of failing output to show
    tail_lines: usize,
    show_progress: bool,
    progress: Mutex<Option<ProgressBar>>,
}

impl TerminalOutput {
    pub fn new(tail_lines: usize, show_progress: bool) -> Self {
        Self {
            tail_lines,
            show_progress,
            progress: Mutex::new(None),
        }
    }

    /// Handle one engine event
    pub fn on_event(&self, event: &ExecutionEvent) {
        let Ok(mut progress) = self.progress.lock() else {
            println!("{}", format_execution_event(event));
            return;
        };

        match event {
            ExecutionEvent::RunStarted { total_steps, .. } if self.show_progress => {
                println!("{}", format_execution_event(event));
                *progress = Some(create_progress_bar(*total_steps));
            }
            ExecutionEvent::StepStarted { name, .. } => {
                if let Some(bar) = progress.as_ref() {
                    bar.set_message(name.clone());
                }
                print_above(progress.as_ref(), &format_execution_event(event));
            }
            ExecutionEvent::StepCompleted { .. } => {
                print_above(progress.as_ref(), &format_execution_event(event));
                if let Some(bar) = progress.as_ref() {
                    bar.inc(1);
                }
            }
            ExecutionEvent::StepFailed { output_tail, .. } => {
                if let Some(bar) = progress.take() {
                    bar.abandon();
                }
                println!("{}", format_execution_event(event));
                if !output_tail.trim().is_empty() {
                    print_separator();
                    println!("{}", format_output(output_tail, self.tail_lines));
                    print_separator();
                }
            }
            ExecutionEvent::RunFinished { .. } => {
                if let Some(bar) = progress.take() {
                    bar.finish_and_clear();
                }
                println!("{}", format_execution_event(event));
            }
            _ => print_above(progress.as_ref(), &format_execution_event(event)),
        }
    }
}

/// Print a line without tearing the progress bar
fn print_above(progress: Option<&ProgressBar>, line: &str) {
    match progress {
        Some(bar) => bar.suspend(|| println!("{}", line)),
        None => println!("{}", line),
    }
}

/// Print a horizontal rule spanning the terminal width
fn print_separator() {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    println!("{}", style("─".repeat(width)).dim());
}
