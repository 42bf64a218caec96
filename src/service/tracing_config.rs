// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use dotenv::dotenv;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::AppResult;

fn fmt_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_string());
    tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true)
}

/// Installs a stdout subscriber filtered by `RUST_LOG` (read from `.env` too).
///
/// Safe to call more than once; later calls are ignored.
pub fn setup_local_tracing() -> AppResult<()> {
    dotenv().ok();
    let _ = tracing_subscriber::registry()
        .with(fmt_layer())
        .with(EnvFilter::from_default_env())
        .try_init();
    Ok(())
}

/// Same as [`setup_local_tracing`] but falls back to a level picked from a
/// `-v` count when `RUST_LOG` is not set.
pub fn setup_tracing_with_verbosity(verbose: u8) -> AppResult<()> {
    dotenv().ok();
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(fmt_layer())
        .with(filter)
        .try_init();
    Ok(())
}
