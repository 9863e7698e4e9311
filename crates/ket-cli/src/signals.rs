// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Interrupt handling: the first SIGINT/SIGTERM cancels the run; later ones
//! are logged and ignored so namespace cleanup can finish.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
async fn next_signal() -> std::io::Result<&'static str> {
	use tokio::signal::unix::{signal, SignalKind};

	let mut terminate = signal(SignalKind::terminate())?;
	tokio::select! {
		res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
		_ = terminate.recv() => Ok("SIGTERM"),
	}
}

#[cfg(not(unix))]
async fn next_signal() -> std::io::Result<&'static str> {
	tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}

/// Cancel `token` on the first interrupt.
pub fn spawn_signal_handler(token: CancellationToken) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut received = 0u32;
		loop {
			match next_signal().await {
				Ok(name) => {
					received += 1;
					if received == 1 {
						tracing::warn!(signal = name, "Interrupted, cancelling and cleaning up");
						token.cancel();
					} else {
						tracing::warn!(signal = name, "Cleanup in progress, ignoring signal");
					}
				}
				Err(e) => {
					tracing::error!(error = %e, "Failed to listen for signals");
					return;
				}
			}
		}
	})
}
