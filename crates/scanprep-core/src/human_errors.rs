// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for people uploading scans.
//
// Every technical error is mapped to plain English with a clear suggestion.
// Severity drives how a front end presents the failure.

use crate::error::ScanprepError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Disk full or file locked; retrying later may succeed.
    Transient,
    /// The user must supply something different (another file, another id).
    ActionRequired,
    /// Cannot be fixed by retrying; the setup itself is wrong.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether retrying the same request can help.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `ScanprepError` into a `HumanError`.
pub fn humanize_error(err: &ScanprepError) -> HumanError {
    match err {
        ScanprepError::Decode(detail) => HumanError {
            message: "We couldn't read this picture.".into(),
            suggestion: format!(
                "Make sure the file is a photo or scan (PNG, JPEG, TIFF, BMP) and isn't damaged. ({detail})"
            ),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        ScanprepError::UnsupportedLayout(detail) => HumanError {
            message: "This picture uses a format we can't prepare.".into(),
            suggestion: format!("Try exporting it as an ordinary PNG or JPEG first. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        ScanprepError::InvalidImageId(id) => HumanError {
            message: "The image reference isn't valid.".into(),
            suggestion: format!(
                "Use only letters, digits, '-' and '_' in image ids. ({id:?})"
            ),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        ScanprepError::Storage(detail) => humanize_storage_error(detail),

        ScanprepError::Io(io) => humanize_storage_error(&io.to_string()),

        ScanprepError::Config(detail) => HumanError {
            message: "The preprocessing settings are invalid.".into(),
            suggestion: format!("Fix or delete the settings file and try again. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanprepError::Serialization(detail) => HumanError {
            message: "The settings file couldn't be read.".into(),
            suggestion: format!("Check that the settings file is valid JSON. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        // Steps and strategies fall back internally; seeing one here means a
        // caller surfaced it directly.
        ScanprepError::Step { .. } | ScanprepError::Binarize(_) | ScanprepError::Encode(_) => {
            HumanError {
                message: "Something went wrong while preparing the picture.".into(),
                suggestion: format!("Try again with fewer corrections enabled. ({err})"),
                retriable: true,
                severity: Severity::Transient,
            }
        }
    }
}

/// Parse filesystem error details into human-readable messages.
fn humanize_storage_error(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("no space") || lower.contains("disk full") {
        HumanError {
            message: "There isn't enough disk space to save the results.".into(),
            suggestion: "Free up some space, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else if lower.contains("permission denied") || lower.contains("read-only") {
        HumanError {
            message: "We aren't allowed to save the results.".into(),
            suggestion: "Check that the output folder exists and is writable.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else {
        HumanError {
            message: "The results couldn't be saved.".into(),
            suggestion: format!("Try again. If this keeps happening, check the output folder. (Detail: {detail})"),
            retriable: true,
            severity: Severity::Transient,
        }
    }
}
