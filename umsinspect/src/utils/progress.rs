// SPDX-License-Identifier: MIT

use indicatif::{ProgressBar, ProgressStyle};

use super::{LogLevel, log_level};

pub fn byte_progress(total_size: u64, message: &str) -> ProgressBar {
    if log_level() == LogLevel::Quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total_size);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.white}] {bytes}/{total_bytes} (ETA {eta_precise}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█░░"));
    }
    pb.set_message(message.to_string());
    pb
}
