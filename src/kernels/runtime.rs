// SPDX-License-Identifier: GPL-3.0-only

//! Execution model shared by all kernels
//!
//! A resident kernel announces itself with READY and then serves requests
//! until EXIT: START, one argument word holding the parameter block address,
//! processing, FIN. Unknown words are logged and skipped. A one-shot run gets
//! its parameter block directly and processes it once.

use crate::constants::MailboxMessage;
use crate::coprocessor::{EffectiveAddress, KernelEnv, KernelProgram};
use crate::errors::KernelError;
use tracing::{debug, error, warn};

/// Run `program` in `env` and return its stop code (0 on success)
pub fn execute(
    program: &dyn KernelProgram,
    env: &KernelEnv,
    argp: Option<EffectiveAddress>,
) -> i32 {
    let result = match argp {
        Some(params) => {
            debug!(kernel = program.name(), params = %params, "One-shot run");
            program.process(env, params)
        }
        None => message_loop(program, env),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(kernel = program.name(), context = env.name(), error = %e, "Kernel terminated");
            e.stop_code()
        }
    }
}

fn message_loop(program: &dyn KernelProgram, env: &KernelEnv) -> Result<(), KernelError> {
    let mailbox = env.mailbox();
    mailbox.write(MailboxMessage::READY)?;
    debug!(kernel = program.name(), "Kernel ready");

    loop {
        match MailboxMessage::from_word(mailbox.read()?) {
            MailboxMessage::Exit => {
                debug!(kernel = program.name(), "Kernel exiting");
                return Ok(());
            }
            MailboxMessage::Start => match MailboxMessage::from_word(mailbox.read()?) {
                MailboxMessage::Argument(word) => {
                    program.process(env, EffectiveAddress(word))?;
                    mailbox.write(MailboxMessage::FIN)?;
                }
                other => return Err(KernelError::MissingArgument(other)),
            },
            other => {
                warn!(kernel = program.name(), message = %other, "Ignoring unexpected mailbox word");
            }
        }
    }
}
