// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local persistence: artifact files, their fingerprints, and the id counter.

pub mod artifacts;
pub mod ids;
pub mod integrity;
