// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod cancellation;
mod gateway;
mod lifecycle;
#[cfg(unix)]
mod sidecar;
mod support;
