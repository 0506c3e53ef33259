// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Issuing open, close and launch requests to the trusted OS.
//!
//! Every method takes `&mut self`; the owner keeps the dispatcher behind a single lock so only one
//! call is ever in flight.

use crate::{
    context::ClientContext,
    error::{OteError, ResultOrigin, TEE_ERROR_COMMUNICATION, TEE_SUCCESS},
    logger::seclog::SecureLog,
    marshal::{Operation, UserMemory, copy_params_in, copy_params_out},
    platform::Platform,
    pool::{ParamAllocator, ParamBlock, RequestDescriptor, RequestPool},
    protocol::{OperParam, RequestType, TeRequest},
    session::{Session, SessionId},
    shared::SharedBuffer,
    smccc::{
        FunctionId, SUCCESS, TE_SMC_CLOSE_SESSION, TE_SMC_LAUNCH_OPERATION, TE_SMC_OPEN_SESSION,
    },
};
use log::{debug, error, info, warn};
use uuid::Uuid;

/// The outcome of an open or launch request, as reported by the trusted OS.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Answer {
    /// A GlobalPlatform result code.
    pub result: u32,
    /// Where the result code was produced, normally a [`ResultOrigin`].
    pub result_origin: u32,
    /// The session opened, or the session the operation ran in.
    pub session_id: u32,
}

impl Answer {
    /// Builds the answer reported for a request which failed before or after the secure call.
    pub fn from_error(error: OteError) -> Self {
        let (result, origin) = error.answer();
        Self {
            result,
            result_origin: origin.into(),
            session_id: 0,
        }
    }

    /// Returns whether the trusted OS reported success.
    pub fn is_success(&self) -> bool {
        self.result == TEE_SUCCESS
    }
}

/// A request on its way to the trusted OS.
struct Call<'a> {
    kind: RequestType,
    session: SessionId,
    destination: Uuid,
    operation: &'a Operation,
}

/// A call which reached the trusted OS.
struct Completed {
    answer: Answer,
    /// Whether the parameters could be copied back to the caller.
    copied_out: Result<(), OteError>,
}

/// Owns the request descriptors, parameter slots and shared buffers, and issues calls with them.
pub struct Dispatcher {
    requests: RequestPool,
    params: ParamAllocator,
    shared: SharedBuffer,
    log: Option<SecureLog>,
}

impl Dispatcher {
    /// Creates a dispatcher using buffers already shared with the trusted OS.
    pub fn new(shared: SharedBuffer) -> Self {
        Self {
            requests: RequestPool::new(),
            params: ParamAllocator::new(),
            shared,
            log: None,
        }
    }

    /// Starts relaying the given log after every call.
    pub fn set_secure_log(&mut self, log: SecureLog) {
        self.log = Some(log);
    }

    /// Returns the buffers shared with the trusted OS.
    pub fn shared(&self) -> &SharedBuffer {
        &self.shared
    }

    /// Returns the number of request descriptors not in use.
    pub fn free_descriptors(&self) -> usize {
        self.requests.free_count()
    }

    /// Returns the number of parameter slots not in use.
    pub fn free_param_slots(&self) -> usize {
        self.params.free_slots()
    }

    /// Opens a session with the given trusted application.
    ///
    /// If the trusted OS reports success the session is added to `context`, even if the parameters
    /// then can't be copied back to the caller, so that it is closed with the context.
    pub fn open_session<P: Platform>(
        &mut self,
        platform: &P,
        context: &mut ClientContext,
        user: &impl UserMemory,
        destination: Uuid,
        operation: &Operation,
    ) -> Result<Answer, OteError> {
        let call = Call {
            kind: RequestType::OpenSession,
            session: SessionId(0),
            destination,
            operation,
        };
        let completed = self.issue(platform, context, user, &call)?;
        let answer = completed.answer;
        if answer.is_success() {
            let id = SessionId(answer.session_id);
            info!("Opened session {id} with {destination}");
            context.sessions.insert(Session { id, destination });
        } else {
            debug!(
                "Open session with {destination} failed: {:#x} from {}",
                answer.result, answer.result_origin
            );
        }
        completed.copied_out?;
        Ok(answer)
    }

    /// Invokes a command in a session of `context`.
    pub fn launch_operation<P: Platform>(
        &mut self,
        platform: &P,
        context: &mut ClientContext,
        user: &impl UserMemory,
        session: SessionId,
        operation: &Operation,
    ) -> Result<Answer, OteError> {
        if !context.sessions.contains(session) {
            warn!("Launch on session {session} which isn't open");
            return Err(OteError::InvalidRequest);
        }
        let call = Call {
            kind: RequestType::LaunchOperation,
            session,
            destination: Uuid::nil(),
            operation,
        };
        let completed = self.issue(platform, context, user, &call)?;
        completed.copied_out?;
        Ok(completed.answer)
    }

    /// Closes a session of `context`.
    ///
    /// This never fails: the session is forgotten locally whatever the trusted OS reports, or even
    /// if the request can't be issued at all.
    pub fn close_session<P: Platform>(
        &mut self,
        platform: &P,
        context: &mut ClientContext,
        user: &impl UserMemory,
        session: SessionId,
    ) {
        if context.sessions.remove(session).is_none() {
            warn!("Close of session {session} which isn't open");
            return;
        }
        let operation = Operation::default();
        let call = Call {
            kind: RequestType::CloseSession,
            session,
            destination: Uuid::nil(),
            operation: &operation,
        };
        match self.issue(platform, context, user, &call) {
            Ok(completed) if !completed.answer.is_success() => warn!(
                "Trusted OS failed to close session {session}: {:#x}",
                completed.answer.result
            ),
            Ok(_) => debug!("Closed session {session}"),
            Err(error) => error!("Couldn't request close of session {session}: {error}"),
        }
        context.release_session_mappings(user, session);
    }

    /// Issues a call with a fresh descriptor and parameter block, both of which are released
    /// before returning whether or not the call succeeded.
    fn issue<P: Platform>(
        &mut self,
        platform: &P,
        context: &mut ClientContext,
        user: &impl UserMemory,
        call: &Call,
    ) -> Result<Completed, OteError> {
        let descriptor = self.requests.acquire_descriptor()?;
        let block = match call.operation.count() {
            0 => None,
            count => match self.params.acquire_param_block(count) {
                Ok(block) => Some(block),
                Err(error) => {
                    warn!("No parameter block for {count} parameters");
                    self.requests.release_descriptor(descriptor);
                    return Err(error);
                }
            },
        };

        let completed = self.issue_with(platform, context, user, call, &descriptor, block.as_ref());

        if let Some(block) = block {
            self.params.release_param_block(block);
        }
        self.requests.release_descriptor(descriptor);
        completed
    }

    fn issue_with<P: Platform>(
        &mut self,
        platform: &P,
        context: &mut ClientContext,
        user: &impl UserMemory,
        call: &Call,
        descriptor: &RequestDescriptor,
        block: Option<&ParamBlock>,
    ) -> Result<Completed, OteError> {
        let slots = block.map_or(0..0, ParamBlock::range);
        *self.shared.request_mut(descriptor.slot()) = TeRequest {
            request_type: call.kind.into(),
            session_id: call.session.0,
            command_id: call.operation.command,
            params_count: call.operation.list_count,
            params_offset: block.map_or(0, ParamBlock::offset),
            dest_uuid: call.destination.into_bytes(),
            ..Default::default()
        };

        let (params, mut page_list) = self.shared.params_and_page_list_mut(slots.clone());
        params.fill(OperParam::default());
        if let Some(entries) = page_list.as_deref_mut() {
            entries.fill(0);
        }
        copy_params_in(user, call.operation, params)?;
        if let Err(error) = context.map_params(user, params, page_list) {
            context.finish_call(user, None);
            return Err(error);
        }

        let function = function_for(call.kind);
        let status = platform.secure_call(function, [descriptor.offset(), 0, 0]);
        if let Some(log) = &mut self.log {
            log.drain();
        }

        let record = self.shared.read_request(descriptor.slot());
        let mut answer = Answer {
            result: record.result,
            result_origin: record.result_origin,
            session_id: match call.kind {
                RequestType::OpenSession => record.session_id,
                _ => call.session.0,
            },
        };
        if status != SUCCESS {
            warn!("{function:?} returned status {status:#x}");
            if answer.is_success() {
                answer.result = TEE_ERROR_COMMUNICATION;
                answer.result_origin = ResultOrigin::Comms.into();
            }
        }

        let returned = self.shared.read_params(slots);
        let copied_out = copy_params_out(
            user,
            call.operation,
            &returned,
            record.params_count as usize,
        );
        context.finish_call(user, answer.is_success().then_some(SessionId(answer.session_id)));
        Ok(Completed { answer, copied_out })
    }
}

fn function_for(kind: RequestType) -> FunctionId {
    match kind {
        RequestType::OpenSession => TE_SMC_OPEN_SESSION,
        RequestType::CloseSession => TE_SMC_CLOSE_SESSION,
        RequestType::LaunchOperation => TE_SMC_LAUNCH_OPERATION,
    }
}
