//! Preprocess command: show how magic directives are rewritten.

use std::io::Read;

use anyhow::Context;
use gantry_core::{MagicPreprocessor, NoticeLevel};

use crate::colors;

/// Print the rewrite of a file (or stdin when `input` is `-`).
pub fn execute(input: &str) -> anyhow::Result<()> {
    let code = if input == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read stdin")?;
        code
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?
    };

    let preprocessed = MagicPreprocessor::new().process(&code);

    if let Some(output) = &preprocessed.immediate {
        for notice in &output.notices {
            let color = match notice.level {
                NoticeLevel::Info => colors::CYAN,
                NoticeLevel::Error => colors::RED,
            };
            eprintln!("{}{:?}:{} {}", color, notice.level, colors::RESET, notice.text);
        }
    }

    println!("{}", preprocessed.code);
    Ok(())
}

/// Print the supported directive names.
pub fn list() {
    let magic = MagicPreprocessor::new();

    println!("{}Line directives:{}", colors::BOLD, colors::RESET);
    for name in magic.line_directives() {
        println!("  %{}", name);
    }

    println!("\n{}Block directives:{}", colors::BOLD, colors::RESET);
    for name in magic.block_directives() {
        println!("  %%{}", name);
    }
}
