// SPDX-License-Identifier: GPL-3.0-only

//! Host-side lifecycle of one coprocessor job
//!
//! A job ties a program to a context and drives it through boot, start,
//! message exchange, stop and shutdown. Keep-alive jobs stay resident and
//! serve requests through the mailbox protocol; one-shot jobs receive their
//! parameter block as the run argument and exit after one pass.
//!
//! Waiting on the outbound mailbox polls in short slices. Between slices the
//! job checks whether the kernel has exited, so a failed kernel surfaces as
//! [`JobError::JobExited`] instead of a hang. An overall bound is optional.

use super::CoprocessorSystem;
use super::context::CoprocessorContext;
use super::mailbox::WriteStatus;
use super::memory::EffectiveAddress;
use super::program::ProgramImage;
use super::protocol::ProtocolState;
use crate::config::Config;
use crate::constants::{DEFAULT_ENTRY, DEFAULT_POLL_INTERVAL, MailboxMessage};
use crate::errors::JobError;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

pub struct CoprocessorJob {
    name: String,
    program: ProgramImage,
    system: CoprocessorSystem,
    context: Option<CoprocessorContext>,
    keep_alive: bool,
    entry_point: u32,
    last_error_code: i32,
    argument_pointer: Option<EffectiveAddress>,
    protocol: ProtocolState,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl CoprocessorJob {
    pub fn new(
        system: &CoprocessorSystem,
        name: &str,
        program: ProgramImage,
        keep_alive: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            program,
            system: system.clone(),
            context: None,
            keep_alive,
            entry_point: DEFAULT_ENTRY,
            last_error_code: 0,
            argument_pointer: None,
            protocol: ProtocolState::Idle,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    /// Apply polling and timeout settings from `config`
    pub fn with_config(mut self, config: &Config) -> Self {
        self.poll_interval = config.poll_interval();
        self.timeout = config.mailbox_timeout();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_booted(&self) -> bool {
        self.context.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.context.as_ref().is_some_and(|c| c.is_running())
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    /// Stop code of the most recent run
    pub fn last_error_code(&self) -> i32 {
        self.last_error_code
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.protocol
    }

    pub fn argument_pointer(&self) -> Option<EffectiveAddress> {
        self.argument_pointer
    }

    /// Parameter block handed to the next one-shot run
    pub fn set_argument_pointer(&mut self, argp: EffectiveAddress) {
        self.argument_pointer = Some(argp);
    }

    /// Create the context and load the program
    pub fn boot(&mut self) -> Result<(), JobError> {
        if self.context.is_some() {
            return Ok(());
        }
        info!(job = %self.name, program = self.program.name(), "Booting coprocessor job");
        let mut context = self.system.create_context(&self.name)?;
        context.load(&self.program)?;
        self.context = Some(context);
        debug!(job = %self.name, "Boot successful");
        Ok(())
    }

    /// Run the job, booting first if needed.
    ///
    /// Keep-alive jobs return once the kernel reported READY; one-shot jobs
    /// return as soon as the execution thread is spawned.
    pub fn start(&mut self) -> Result<(), JobError> {
        self.boot()?;
        let argp = if self.keep_alive {
            None
        } else {
            Some(self.argument_pointer.ok_or_else(|| JobError::ProgramLoad {
                name: self.name.clone(),
                reason: "one-shot job started without a parameter block".to_string(),
            })?)
        };

        self.entry_point = DEFAULT_ENTRY;
        self.last_error_code = 0;
        self.protocol = ProtocolState::Idle;
        let entry = self.entry_point;
        self.context_mut()?.run(entry, argp)?;
        info!(job = %self.name, keep_alive = self.keep_alive, "Coprocessor job started");

        if self.keep_alive {
            self.wait_for_message(MailboxMessage::Ready)?;
        }
        Ok(())
    }

    /// Write one word to the inbound mailbox, blocking until it is accepted
    pub fn send_message(&mut self, value: u64) -> Result<(), JobError> {
        self.ensure_running()?;
        let next = self.protocol.on_send(value).ok_or_else(|| JobError::Protocol {
            name: self.name.clone(),
            state: self.protocol,
            message: MailboxMessage::from_word(value),
        })?;
        self.write_word(value)?;
        trace!(job = %self.name, message = %MailboxMessage::from_word(value), "Sent");
        self.protocol = next;
        Ok(())
    }

    /// Read one word and require it to be `expected`
    pub fn wait_for_message(&mut self, expected: MailboxMessage) -> Result<(), JobError> {
        self.ensure_booted()?;
        if !self.protocol.can_await(expected) {
            return Err(JobError::Protocol {
                name: self.name.clone(),
                state: self.protocol,
                message: expected,
            });
        }

        let word = self.read_word()?;
        let received = MailboxMessage::from_word(word);
        trace!(job = %self.name, message = %received, "Received");
        if received != expected {
            return Err(JobError::MessageMismatch {
                name: self.name.clone(),
                expected,
                received,
            });
        }
        self.protocol = self.protocol.on_received(received);
        Ok(())
    }

    /// Send START and the parameter block address without waiting for FIN
    pub fn submit(&mut self, params: EffectiveAddress) -> Result<(), JobError> {
        // Recorded first so an interrupted exchange can be completed
        self.argument_pointer = Some(params);
        self.send_message(MailboxMessage::START)?;
        self.send_message(params.as_u64())
    }

    /// Bring a keep-alive job back to an idle protocol state.
    ///
    /// A failed wait or write leaves the host mid-exchange while the kernel
    /// keeps going. A half-sent request is completed with its recorded
    /// argument and an unanswered one waits for its late FIN; either way the
    /// kernel has let go of the request's buffers once this returns `Ok`.
    /// A resident kernel that has exited is restarted.
    pub fn resync(&mut self) -> Result<(), JobError> {
        if !self.keep_alive || !self.is_booted() {
            return Ok(());
        }
        if !self.is_running() {
            info!(job = %self.name, "Restarting exited coprocessor job");
            return self.start();
        }
        match self.protocol {
            ProtocolState::Idle => return Ok(()),
            ProtocolState::AwaitingArg => {
                let argp = self.argument_pointer.ok_or_else(|| JobError::Protocol {
                    name: self.name.clone(),
                    state: self.protocol,
                    message: MailboxMessage::Fin,
                })?;
                debug!(job = %self.name, "Completing half-sent request");
                self.send_message(argp.as_u64())?;
            }
            ProtocolState::AwaitingFin => {}
        }
        self.wait_for_message(MailboxMessage::Fin)?;
        info!(job = %self.name, "Collected late FIN");
        Ok(())
    }

    /// Full request: submit and wait for FIN
    pub fn request(&mut self, params: EffectiveAddress) -> Result<(), JobError> {
        self.submit(params)?;
        self.wait_for_message(MailboxMessage::Fin)
    }

    /// Run a one-shot job on `params` to completion
    pub fn run_once(&mut self, params: EffectiveAddress) -> Result<(), JobError> {
        self.set_argument_pointer(params);
        self.start()?;
        let code = self.stop()?;
        if code != 0 {
            return Err(JobError::JobExited {
                name: self.name.clone(),
                code,
            });
        }
        Ok(())
    }

    /// Join the execution thread and return its stop code
    pub fn stop(&mut self) -> Result<i32, JobError> {
        debug!(job = %self.name, "Waiting for execution thread");
        let result = self.context_mut()?.join();
        self.finish_run(result)
    }

    /// Stop a resident kernel and destroy the context
    pub fn shutdown(&mut self) -> Result<(), JobError> {
        let Some(context) = self.context.as_ref() else {
            return Ok(());
        };
        info!(job = %self.name, "Shutting down coprocessor job");

        if context.is_running() {
            if self.keep_alive && !context.has_exited() {
                if self.protocol != ProtocolState::Idle {
                    warn!(job = %self.name, state = %self.protocol, "Sending EXIT with a request outstanding");
                }
                self.write_word(MailboxMessage::EXIT)?;
            }
            self.stop()?;
        }

        let context = self.context.take();
        self.protocol = ProtocolState::Idle;
        match context {
            Some(context) => context.destroy(),
            None => Ok(()),
        }
    }

    fn context_mut(&mut self) -> Result<&mut CoprocessorContext, JobError> {
        let name = &self.name;
        self.context.as_mut().ok_or_else(|| JobError::NotBooted {
            name: name.clone(),
        })
    }

    fn ensure_booted(&self) -> Result<&CoprocessorContext, JobError> {
        self.context.as_ref().ok_or_else(|| JobError::NotBooted {
            name: self.name.clone(),
        })
    }

    fn ensure_running(&self) -> Result<&CoprocessorContext, JobError> {
        let context = self.ensure_booted()?;
        if !context.is_running() {
            return Err(JobError::NotRunning {
                name: self.name.clone(),
            });
        }
        Ok(context)
    }

    fn finish_run(&mut self, result: Result<i32, JobError>) -> Result<i32, JobError> {
        self.protocol = ProtocolState::Idle;
        match result {
            Ok(code) => {
                self.last_error_code = code;
                if code != 0 {
                    warn!(job = %self.name, code, "Coprocessor job stopped with an error");
                }
                Ok(code)
            }
            Err(e) => {
                // The kernel environment went down with the thread
                error!(job = %self.name, error = %e, "Lost coprocessor context");
                self.context = None;
                Err(e)
            }
        }
    }

    /// Reap an exited kernel and report it
    fn exited(&mut self) -> JobError {
        let result = self.context_mut().and_then(|c| c.join());
        match self.finish_run(result) {
            Ok(code) => JobError::JobExited {
                name: self.name.clone(),
                code,
            },
            Err(e) => e,
        }
    }

    fn write_word(&mut self, word: u64) -> Result<(), JobError> {
        let started = Instant::now();
        loop {
            let context = self.ensure_running()?;
            match context.mailbox().try_write(word) {
                WriteStatus::Accepted => return Ok(()),
                WriteStatus::Closed => {
                    return Err(JobError::MailboxWrite {
                        name: self.name.clone(),
                        value: word,
                    });
                }
                WriteStatus::Full => {}
            }
            if context.has_exited() {
                return Err(self.exited());
            }
            self.check_timeout(started)?;
            std::thread::sleep(self.poll_interval);
        }
    }

    fn read_word(&mut self) -> Result<u64, JobError> {
        let started = Instant::now();
        loop {
            let context = self.ensure_booted()?;
            if let Some(word) = context.mailbox().read_timeout(self.poll_interval) {
                return Ok(word);
            }
            if !context.is_running() {
                return Err(JobError::NotRunning {
                    name: self.name.clone(),
                });
            }
            if context.has_exited() {
                // A final word may have landed just before the thread returned
                if let Some(word) = context.mailbox().try_read() {
                    return Ok(word);
                }
                return Err(self.exited());
            }
            self.check_timeout(started)?;
        }
    }

    fn check_timeout(&self, started: Instant) -> Result<(), JobError> {
        match self.timeout {
            Some(limit) if started.elapsed() >= limit => Err(JobError::Timeout {
                name: self.name.clone(),
                waited: started.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}

impl Drop for CoprocessorJob {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(job = %self.name, error = %e, "Shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for CoprocessorJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoprocessorJob")
            .field("name", &self.name)
            .field("program", &self.program.name())
            .field("booted", &self.is_booted())
            .field("running", &self.is_running())
            .field("keep_alive", &self.keep_alive)
            .field("protocol", &self.protocol)
            .field("last_error_code", &self.last_error_code)
            .finish()
    }
}
