//! Cogs compiled into the bot

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::application::errors::CommandError;
use crate::domain::entities::{CogTemplate, Command, Content};
use crate::plugins::host::Registrar;
use crate::plugins::source::BuiltinSource;
use crate::plugins::trait_def::{Cog, CogSource};

/// Source for a builtin `(module, class)` pair, if the bot ships one
pub fn builtin_source(module: &str, class: &str) -> Option<Arc<dyn CogSource>> {
    let source: Arc<dyn CogSource> = match (module, class) {
        ("cogs.general", "General") => Arc::new(BuiltinSource::of(module, General::metadata(), General::new)),
        ("cogs.echo", "Echo") => Arc::new(BuiltinSource::of(module, Echo::metadata(), Echo::new)),
        _ => return None,
    };
    Some(source)
}

/// Ping, about and a periodic heartbeat
pub struct General {
    template: CogTemplate,
    heartbeat: Duration,
}

impl General {
    pub fn new() -> Self {
        Self {
            template: Self::metadata(),
            heartbeat: Duration::from_secs(300),
        }
    }

    fn metadata() -> CogTemplate {
        CogTemplate::new("General")
            .with_description("Basic bot commands")
            .with_category("Utility")
            .with_version(env!("CARGO_PKG_VERSION"))
    }
}

impl Default for General {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cog for General {
    fn template(&self) -> &CogTemplate {
        &self.template
    }

    async fn setup(&mut self, registrar: &mut Registrar) -> Result<(), String> {
        let attached_at: DateTime<Utc> = Utc::now();

        registrar
            .add_command(
                Command::new("ping")
                    .with_description("Check that the bot responds")
                    .with_handler(|_| Ok("Pong!".to_string())),
            )
            .map_err(|e| e.to_string())?;

        let template = self.template.clone();
        registrar
            .add_command(
                Command::new("about")
                    .with_description("Show bot information")
                    .with_handler(move |_| {
                        let up = Utc::now() - attached_at;
                        Ok(format!(
                            "cogbot v{}\n{}: {}\nUp for {}m {}s",
                            template.version,
                            template.name,
                            template.description,
                            up.num_minutes(),
                            up.num_seconds() % 60
                        ))
                    }),
            )
            .map_err(|e| e.to_string())?;

        registrar.add_listener("ready", |payload| {
            tracing::info!(bot = payload, "General cog ready");
        });

        let every = self.heartbeat;
        registrar.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::debug!("Heartbeat");
            }
        });
        Ok(())
    }
}

/// Repeats its arguments back
pub struct Echo {
    template: CogTemplate,
    echoed: Arc<AtomicU64>,
}

impl Echo {
    pub fn new() -> Self {
        Self {
            template: Self::metadata(),
            echoed: Arc::new(AtomicU64::new(0)),
        }
    }

    fn metadata() -> CogTemplate {
        CogTemplate::new("Echo")
            .with_description("Repeats what you say")
            .with_category("Fun")
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cog for Echo {
    fn template(&self) -> &CogTemplate {
        &self.template
    }

    async fn setup(&mut self, registrar: &mut Registrar) -> Result<(), String> {
        let echoed = Arc::clone(&self.echoed);
        registrar
            .add_command(
                Command::new("echo")
                    .with_aliases(vec!["say".to_string()])
                    .with_description("Repeat the given text")
                    .with_usage("echo <text>")
                    .with_handler(move |msg| {
                        let Content::Command { args, .. } = &msg.content else {
                            return Err(CommandError::InvalidArgs("expected a command".to_string()));
                        };
                        if args.is_empty() {
                            return Err(CommandError::InvalidArgs("usage: echo <text>".to_string()));
                        }
                        echoed.fetch_add(1, Ordering::Relaxed);
                        Ok(args.join(" "))
                    }),
            )
            .map_err(|e| e.to_string())?;

        registrar.add_listener("message", |text| {
            tracing::trace!(len = text.len(), "Echo saw a message");
        });
        Ok(())
    }

    async fn teardown(&mut self) -> Result<(), String> {
        tracing::debug!(echoed = self.echoed.load(Ordering::Relaxed), "Echo cog detaching");
        Ok(())
    }
}
