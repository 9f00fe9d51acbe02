//! Terminal rendering of execution output.

use gantry_core::{MimeBundle, OutputEvent, StreamName};

use crate::colors;

/// Print one output event as it arrives.
pub fn print_event(event: &OutputEvent) {
    match event {
        OutputEvent::Stream {
            name: StreamName::Stdout,
            text,
        } => {
            print!("{}", text);
            colors::flush_stdout();
        }
        OutputEvent::Stream {
            name: StreamName::Stderr,
            text,
        } => eprint!("{}", text),
        OutputEvent::ExecuteResult {
            data,
            execution_count,
        } => {
            let label = execution_count
                .map(|n| format!("Out[{}]: ", n))
                .unwrap_or_default();
            println!("{}{}{}{}", colors::CYAN, label, colors::RESET, plain_text(data));
        }
        OutputEvent::DisplayData { data } => println!("{}", plain_text(data)),
        OutputEvent::Error {
            ename,
            evalue,
            traceback,
        } => {
            for line in traceback {
                eprintln!("{}{}{}", colors::DIM, line, colors::RESET);
            }
            eprintln!("{}{}{}: {}", colors::RED, ename, colors::RESET, evalue);
        }
    }
}

/// Best plain-text rendering of a MIME bundle.
fn plain_text(data: &MimeBundle) -> String {
    match data.get("text/plain") {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => {
            let kinds: Vec<&str> = data.keys().map(String::as_str).collect();
            format!("<{}>", kinds.join(", "))
        }
    }
}
