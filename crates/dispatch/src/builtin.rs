//! Built-in command handlers.
//!
//! Anything unmatched here is first checked against the learned-command
//! table, then delegated to the module registry.

use std::path::PathBuf;

use aman_core::traits::CameraFacing;
use aman_core::types::{HandlerResult, ParsedCommand, SourceChannel};
use aman_core::{Error, Result};
use aman_modules::checksum_hex;

use crate::dispatcher::Dispatcher;

const HELP_TEXT: &str = "Commands: status | pause | unpause | sms to=<number> message=<text> | \
photo [camera=front|back] [quality=1-100] [send_to=<number>] | add_number number=<n> | \
remove_number number=<n> | list_numbers | learn command=<name> action=<text> | \
load_module name=<id> url=<url> | list_modules | update url=<package url> | help | shutdown";

impl Dispatcher {
    /// EXECUTING: run one action. Errors returned here are caught at the
    /// dispatcher boundary and turned into failure results.
    pub(crate) async fn execute_action(
        &self,
        parsed: &ParsedCommand,
        sender: &str,
        source: SourceChannel,
        expanded: bool,
    ) -> Result<HandlerResult> {
        match parsed.action.as_str() {
            "status" => self.builtin_status().await,
            "pause" => self.builtin_pause().await,
            "unpause" | "resume" => self.builtin_resume().await,
            "sms" => self.builtin_sms(parsed, source).await,
            "photo" => self.builtin_photo(parsed).await,
            "add_number" => self.builtin_add_number(parsed).await,
            "remove_number" => self.builtin_remove_number(parsed).await,
            "list_numbers" => self.builtin_list_numbers().await,
            "learn" => self.builtin_learn(parsed),
            "load_module" => self.builtin_load_module(parsed).await,
            "list_modules" => self.builtin_list_modules(),
            "update" => self.builtin_update(parsed).await,
            "help" => Ok(HandlerResult::respond(HELP_TEXT)),
            "shutdown" => self.builtin_shutdown(),
            _ => self.execute_unmatched(parsed, sender, source, expanded).await,
        }
    }

    async fn builtin_status(&self) -> Result<HandlerResult> {
        let uptime = self.started_at.elapsed().as_secs();
        let paused = self.authorizer.is_paused().await;
        Ok(HandlerResult::respond(format!(
            "AMAN agent v{} | uptime {}s | modules: {} | paused: {}",
            env!("CARGO_PKG_VERSION"),
            uptime,
            self.registry.len(),
            paused
        )))
    }

    async fn builtin_pause(&self) -> Result<HandlerResult> {
        self.authorizer.set_paused(true).await;
        Ok(HandlerResult::respond("Agent paused"))
    }

    async fn builtin_resume(&self) -> Result<HandlerResult> {
        self.authorizer.set_paused(false).await;
        Ok(HandlerResult::respond("Agent resumed"))
    }

    async fn builtin_sms(
        &self,
        parsed: &ParsedCommand,
        source: SourceChannel,
    ) -> Result<HandlerResult> {
        // Validation already guaranteed `to` and a message body.
        let to = require(parsed, "to")?;
        let message = parsed
            .parameters
            .get("message")
            .or_else(|| parsed.parameters.get("text"))
            .ok_or_else(|| Error::execution("required parameter missing: message"))?;

        self.transport_for(source)
            .send(to, message)
            .await
            .map_err(|e| Error::execution(format!("SMS send failed: {}", e)))?;

        Ok(HandlerResult::respond(format!("SMS sent to {}", to)))
    }

    async fn builtin_photo(&self, parsed: &ParsedCommand) -> Result<HandlerResult> {
        let facing = parsed
            .parameters
            .get("camera")
            .and_then(|c| c.parse::<CameraFacing>().ok())
            .unwrap_or(CameraFacing::Back);
        let quality: u8 = parsed
            .parameters
            .get("quality")
            .and_then(|q| q.parse().ok())
            .unwrap_or(85);

        let photo = self
            .camera
            .capture(facing, quality)
            .await
            .map_err(|e| Error::execution(format!("Photo capture failed: {}", e)))?;

        let mut message = format!("Photo captured ({} bytes)", photo.len());
        if let Some(send_to) = parsed.parameters.get("send_to") {
            match self
                .transport_for(SourceChannel::Sms)
                .send(send_to, &message)
                .await
            {
                Ok(()) => message = format!("Photo captured and sent to {}", send_to),
                Err(e) => {
                    tracing::warn!(recipient = %send_to, error = %e, "Photo delivery failed")
                }
            }
        }
        Ok(HandlerResult::respond(message))
    }

    async fn builtin_add_number(&self, parsed: &ParsedCommand) -> Result<HandlerResult> {
        let number = require(parsed, "number")?;
        self.authorizer.add_authorized(number).await;
        Ok(HandlerResult::respond(format!("Number {} authorized", number)))
    }

    async fn builtin_remove_number(&self, parsed: &ParsedCommand) -> Result<HandlerResult> {
        let number = require(parsed, "number")?;
        if self.authorizer.remove_authorized(number).await {
            Ok(HandlerResult::respond(format!("Number {} removed", number)))
        } else {
            Ok(HandlerResult::respond(format!(
                "Number {} was not authorized",
                number
            )))
        }
    }

    async fn builtin_list_numbers(&self) -> Result<HandlerResult> {
        let numbers = self.authorizer.authorized_list().await;
        if numbers.is_empty() {
            Ok(HandlerResult::respond("No authorized numbers"))
        } else {
            Ok(HandlerResult::respond(format!(
                "Authorized numbers: {}",
                numbers.join(", ")
            )))
        }
    }

    fn builtin_learn(&self, parsed: &ParsedCommand) -> Result<HandlerResult> {
        let command = require(parsed, "command")?;
        let action = require(parsed, "action")?;
        self.learned
            .insert(command.to_lowercase(), action.to_string());
        Ok(HandlerResult::respond(format!(
            "Learned command '{}'",
            command.to_lowercase()
        )))
    }

    async fn builtin_load_module(&self, parsed: &ParsedCommand) -> Result<HandlerResult> {
        let name = require(parsed, "name")?;
        let url = require(parsed, "url")?;

        let checksum = self.registry.load(name, url).await?;
        Ok(HandlerResult::respond(format!(
            "Module '{}' loaded (sha256 {})",
            name,
            &checksum[..12]
        )))
    }

    fn builtin_list_modules(&self) -> Result<HandlerResult> {
        let modules = self.registry.list();
        if modules.is_empty() {
            return Ok(HandlerResult::respond("No modules loaded"));
        }
        let lines: Vec<String> = modules
            .iter()
            .map(|m| format!("{} v{} (loaded {})", m.name, m.version, m.load_time.format("%Y-%m-%d %H:%M:%S")))
            .collect();
        Ok(HandlerResult::respond(format!(
            "Loaded modules: {}",
            lines.join("; ")
        )))
    }

    async fn builtin_update(&self, parsed: &ParsedCommand) -> Result<HandlerResult> {
        let url = require(parsed, "url")?;

        let bytes = self.update_fetcher.fetch(url).await?;
        let checksum = checksum_hex(&bytes);

        tokio::fs::create_dir_all(&self.update_dir)
            .await
            .map_err(|e| Error::execution(format!("update dir: {}", e)))?;
        let filename = url
            .rsplit('/')
            .next()
            .filter(|f| !f.is_empty())
            .unwrap_or("update.pkg");
        let path = PathBuf::from(&self.update_dir).join(filename);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::execution(format!("stage update: {}", e)))?;

        tracing::info!(path = %path.display(), checksum = %checksum, "Update package staged");
        Ok(HandlerResult::respond(format!(
            "Update staged: {} (sha256 {})",
            path.display(),
            &checksum[..12]
        )))
    }

    fn builtin_shutdown(&self) -> Result<HandlerResult> {
        // Loops observe the watch channel and drain out.
        let _ = self.shutdown.send(true);
        Ok(HandlerResult::respond("Shutting down"))
    }

    /// Unmatched actions: learned aliases expand once, then the module
    /// registry gets the command.
    async fn execute_unmatched(
        &self,
        parsed: &ParsedCommand,
        sender: &str,
        source: SourceChannel,
        expanded: bool,
    ) -> Result<HandlerResult> {
        if !expanded {
            let stored = self.learned.get(&parsed.action).map(|v| v.value().clone());
            if let Some(stored) = stored {
                let alias = aman_command::parse(&stored)
                    .ok_or_else(|| Error::execution("learned command is empty"))?;
                let verdict = aman_command::validate(&alias.action, &alias.parameters);
                if !verdict.valid {
                    return Err(Error::execution(verdict.message));
                }
                // The master-only gate applies to the stored action too; an
                // alias must not widen what the sender may do.
                if let Some(denial) = self.master_denial(&alias, sender).await {
                    return Err(Error::unauthorized(
                        denial.trim_start_matches("Unauthorized: "),
                    ));
                }
                // One level of expansion only; an alias cannot invoke another
                // alias or re-expand itself.
                return Box::pin(self.execute_action(&alias, sender, source, true)).await;
            }
        }

        let response = self
            .registry
            .execute(&parsed.action, &parsed.parameters, sender)
            .await?;
        Ok(HandlerResult::respond(response))
    }
}

/// A parameter missing after validation indicates a dispatcher bug; surfaced
/// as an execution error rather than a panic.
fn require<'a>(parsed: &'a ParsedCommand, key: &str) -> Result<&'a str> {
    parsed
        .parameters
        .get(key)
        .ok_or_else(|| Error::execution(format!("required parameter missing: {}", key)))
}
