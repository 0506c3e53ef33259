// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The driver instance and its open, request and close entry points.

use crate::{
    config::DriverConfig,
    context::{ClientContext, ClientHandle},
    dispatcher::{Answer, Dispatcher},
    error::OteError,
    logger::seclog::{LogPage, SecureLog},
    marshal::{Operation, UserMemory},
    platform::Platform,
    protocol::MAX_PARAM_COUNT,
    session::SessionId,
    shared::{ShareMode, SharedBuffer, checked_phys},
    smccc::{SUCCESS, TE_SMC_INIT_LOGGER},
};
use alloc::{collections::BTreeMap, vec::Vec};
use log::{info, warn};
use spin::mutex::SpinMutex;
use uuid::Uuid;

/// A request from a client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Request {
    /// Open a session with a trusted application.
    OpenSession {
        /// The trusted application to connect to.
        destination: Uuid,
        /// The command and parameters passed to the trusted application.
        operation: Operation,
    },
    /// Close a session opened by the same client.
    CloseSession {
        /// The session to close.
        session: SessionId,
    },
    /// Invoke a command in a session opened by the same client.
    LaunchOperation {
        /// The session to run the command in.
        session: SessionId,
        /// The command and its parameters.
        operation: Operation,
    },
}

impl Request {
    fn validate(&self) -> Result<(), OteError> {
        match self {
            Self::OpenSession { operation, .. } | Self::LaunchOperation { operation, .. }
                if operation.count() > MAX_PARAM_COUNT =>
            {
                warn!("Request with {} parameters", operation.count());
                Err(OteError::InvalidRequest)
            }
            _ => Ok(()),
        }
    }
}

struct DeviceState {
    dispatcher: Dispatcher,
    contexts: BTreeMap<ClientHandle, ClientContext>,
    next_handle: u64,
}

/// The driver, once its buffers have been shared with the trusted OS.
///
/// All state is behind one lock, which is held for the whole of every request, so only one call
/// into the secure world is in flight at any time.
pub struct OteDevice<P: Platform> {
    platform: P,
    state: SpinMutex<DeviceState>,
}

impl<P: Platform> OteDevice<P> {
    /// Sets up the driver according to `config`.
    ///
    /// Fails without calling into the secure world if the driver is disabled. Failing to set up
    /// the secure world log is not fatal.
    pub fn probe(platform: P, config: &DriverConfig) -> Result<Self, OteError> {
        if !config.enabled {
            info!("TLK driver disabled");
            return Err(OteError::Disabled);
        }
        let shared = SharedBuffer::setup(&platform)?;
        let mut dispatcher = Dispatcher::new(shared);
        if config.secure_log {
            match register_secure_log(&platform, dispatcher.shared().mode()) {
                Ok(log) => dispatcher.set_secure_log(log),
                Err(error) => warn!("Secure world log not available: {error}"),
            }
        }
        Ok(Self {
            platform,
            state: SpinMutex::new(DeviceState {
                dispatcher,
                contexts: BTreeMap::new(),
                next_handle: 1,
            }),
        })
    }

    /// Returns the platform the driver calls through.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Opens a new client.
    pub fn open(&self) -> ClientHandle {
        let mut state = self.state.lock();
        let handle = ClientHandle(state.next_handle);
        state.next_handle += 1;
        state.contexts.insert(handle, ClientContext::new());
        handle
    }

    /// Handles a request from the given client.
    ///
    /// `user` gives access to the client's memory, where the parameter chain of the operation
    /// lives.
    pub fn request(
        &self,
        handle: ClientHandle,
        request: Request,
        user: &impl UserMemory,
    ) -> Result<Answer, OteError> {
        request.validate()?;
        let mut state = self.state.lock();
        let DeviceState {
            dispatcher,
            contexts,
            ..
        } = &mut *state;
        let context = contexts.get_mut(&handle).ok_or_else(|| {
            warn!("Request from unknown {handle}");
            OteError::InvalidRequest
        })?;

        match request {
            Request::OpenSession {
                destination,
                operation,
            } => dispatcher.open_session(&self.platform, context, user, destination, &operation),
            Request::LaunchOperation { session, operation } => {
                dispatcher.launch_operation(&self.platform, context, user, session, &operation)
            }
            Request::CloseSession { session } => {
                dispatcher.close_session(&self.platform, context, user, session);
                Ok(Answer {
                    session_id: session.0,
                    ..Default::default()
                })
            }
        }
    }

    /// Closes the given client, closing every session it still has open and unpinning its
    /// buffers.
    ///
    /// Returns the number of sessions closed.
    pub fn close(&self, handle: ClientHandle, user: &impl UserMemory) -> Result<usize, OteError> {
        let mut state = self.state.lock();
        let DeviceState {
            dispatcher,
            contexts,
            ..
        } = &mut *state;
        let mut context = contexts
            .remove(&handle)
            .ok_or(OteError::InvalidRequest)?;

        let sessions = context
            .sessions
            .iter()
            .map(|session| session.id)
            .collect::<Vec<_>>();
        for &session in &sessions {
            dispatcher.close_session(&self.platform, &mut context, user, session);
        }
        context.release_all_mappings(user);
        info!("Closed {handle} and {} sessions", sessions.len());
        Ok(sessions.len())
    }

    /// Returns the number of sessions the given client has open.
    pub fn session_count(&self, handle: ClientHandle) -> Option<usize> {
        let state = self.state.lock();
        state.contexts.get(&handle).map(|context| context.sessions.len())
    }

    /// Returns the number of request descriptors and parameter slots not in use.
    pub fn free_resources(&self) -> (usize, usize) {
        let state = self.state.lock();
        (
            state.dispatcher.free_descriptors(),
            state.dispatcher.free_param_slots(),
        )
    }
}

/// Allocates a log page and registers it with the trusted OS, by the same kind of address as the
/// request buffers.
fn register_secure_log<P: Platform>(platform: &P, mode: ShareMode) -> Result<SecureLog, OteError> {
    let log = SecureLog::new()?;
    let len = size_of::<LogPage>();
    let addr = match mode {
        ShareMode::Registered => log.addr() as u64,
        ShareMode::Fallback => checked_phys(platform, log.addr(), len)?,
    };
    let status = platform.secure_call(TE_SMC_INIT_LOGGER, [addr, len as u64, 0]);
    if status != SUCCESS {
        return Err(OteError::SecureCall {
            call: TE_SMC_INIT_LOGGER,
            status,
        });
    }
    info!("Secure world log registered at {addr:#x}");
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::test::{FakeTlk, FakeUserMemory},
        pool::REQUEST_COUNT,
        protocol::{OperParam, PAGE_SIZE, PARAM_SLOTS, ParamType},
        smccc::{NOT_SUPPORTED, TE_SMC_CLOSE_SESSION, TE_SMC_OPEN_SESSION},
    };

    const TA: Uuid = Uuid::from_u128(0x1234_5678_9abc_4def_8123_4567_89ab_cdef);

    fn open_session(device: &OteDevice<FakeTlk>, handle: ClientHandle, user: &FakeUserMemory) {
        let answer = device
            .request(
                handle,
                Request::OpenSession {
                    destination: TA,
                    operation: Operation::default(),
                },
                user,
            )
            .unwrap();
        assert!(answer.is_success());
    }

    #[test]
    fn disabled() {
        let config = DriverConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(matches!(
            OteDevice::probe(FakeTlk::new(), &config),
            Err(OteError::Disabled)
        ));
    }

    #[test]
    fn fallback_beyond_address_width() {
        let tlk = FakeTlk::new();
        tlk.set_supports_registered(false);
        // The request page just fits, the parameter page doesn't.
        tlk.set_phys_base(0xffff_f000);
        assert!(matches!(
            OteDevice::probe(tlk, &DriverConfig::default()),
            Err(OteError::AddressOutOfRange(0x1_0000_0000))
        ));
    }

    #[test]
    fn open_close_session() {
        let device = OteDevice::probe(FakeTlk::new(), &DriverConfig::default()).unwrap();
        let user = FakeUserMemory::new();
        let handle = device.open();
        open_session(&device, handle, &user);
        assert_eq!(device.session_count(handle), Some(1));

        let session = SessionId(device.platform().open_sessions()[0]);
        let answer = device
            .request(handle, Request::CloseSession { session }, &user)
            .unwrap();
        assert_eq!(answer.session_id, session.0);
        assert_eq!(device.session_count(handle), Some(0));
        assert!(device.platform().open_sessions().is_empty());
        assert_eq!(device.free_resources(), (REQUEST_COUNT, PARAM_SLOTS));
    }

    #[test]
    fn teardown_closes_every_session() {
        let device = OteDevice::probe(FakeTlk::new(), &DriverConfig::default()).unwrap();
        let user = FakeUserMemory::new();
        let handle = device.open();
        let other = device.open();
        assert_ne!(handle, other);
        for _ in 0..3 {
            open_session(&device, handle, &user);
        }
        open_session(&device, other, &user);

        assert_eq!(device.close(handle, &user), Ok(3));
        let tlk = device.platform();
        assert_eq!(tlk.call_count(TE_SMC_CLOSE_SESSION), 3);
        assert_eq!(tlk.open_sessions().len(), 1);
        assert_eq!(device.session_count(handle), None);
        assert_eq!(device.session_count(other), Some(1));
        assert_eq!(device.free_resources(), (REQUEST_COUNT, PARAM_SLOTS));
    }

    #[test]
    fn teardown_ignores_secure_world_errors() {
        let device = OteDevice::probe(FakeTlk::new(), &DriverConfig::default()).unwrap();
        let user = FakeUserMemory::new();
        let handle = device.open();
        for _ in 0..2 {
            open_session(&device, handle, &user);
        }

        device.platform().set_status(NOT_SUPPORTED);
        assert_eq!(device.close(handle, &user), Ok(2));
        assert_eq!(device.platform().call_count(TE_SMC_CLOSE_SESSION), 2);
    }

    #[test]
    fn teardown_unpins_persistent_buffers() {
        let device = OteDevice::probe(FakeTlk::new(), &DriverConfig::default()).unwrap();
        let user = FakeUserMemory::new();
        let handle = device.open();
        let buffer = user.alloc(16);
        let operation = user.write_chain(&[OperParam {
            param_type: ParamType::PersistMemRw.into(),
            a: buffer.addr(),
            b: 16,
            ..Default::default()
        }]);
        device
            .request(
                handle,
                Request::OpenSession {
                    destination: TA,
                    operation,
                },
                &user,
            )
            .unwrap();
        assert_eq!(user.pinned().len(), 1);

        device.close(handle, &user).unwrap();
        assert!(user.pinned().is_empty());
    }

    #[test]
    fn unknown_handle() {
        let device = OteDevice::probe(FakeTlk::new(), &DriverConfig::default()).unwrap();
        let user = FakeUserMemory::new();
        let handle = device.open();
        device.close(handle, &user).unwrap();

        assert_eq!(
            device.request(
                handle,
                Request::CloseSession {
                    session: SessionId(1)
                },
                &user
            ),
            Err(OteError::InvalidRequest)
        );
        assert_eq!(device.close(handle, &user), Err(OteError::InvalidRequest));
    }

    #[test]
    fn too_many_params() {
        let device = OteDevice::probe(FakeTlk::new(), &DriverConfig::default()).unwrap();
        let user = FakeUserMemory::new();
        let handle = device.open();
        let request = Request::OpenSession {
            destination: TA,
            operation: Operation {
                list_count: MAX_PARAM_COUNT as u32 + 1,
                ..Default::default()
            },
        };
        assert_eq!(
            device.request(handle, request, &user),
            Err(OteError::InvalidRequest)
        );
        assert_eq!(device.platform().call_count(TE_SMC_OPEN_SESSION), 0);
    }

    #[test]
    fn secure_log_registered() {
        let config = DriverConfig {
            secure_log: true,
            ..Default::default()
        };
        let device = OteDevice::probe(FakeTlk::new(), &config).unwrap();
        let calls = device.platform().calls();
        let (function, args) = *calls.last().unwrap();
        assert_eq!(function, TE_SMC_INIT_LOGGER);
        assert_eq!(args[0] % PAGE_SIZE as u64, 0);
        assert_eq!(args[1], PAGE_SIZE as u64);
    }

    #[test]
    fn secure_log_by_physical_address_in_fallback() {
        let tlk = FakeTlk::new();
        tlk.set_supports_registered(false);
        let config = DriverConfig {
            secure_log: true,
            ..Default::default()
        };
        let device = OteDevice::probe(tlk, &config).unwrap();
        let (function, args) = *device.platform().calls().last().unwrap();
        assert_eq!(function, TE_SMC_INIT_LOGGER);
        // The fourth page translated, after the request page, parameter page and page list.
        assert_eq!(args[0], 0x8000_0000 + 3 * PAGE_SIZE as u64);
    }

    #[test]
    fn secure_log_failure_is_not_fatal() {
        let tlk = FakeTlk::new();
        tlk.set_supports_logger(false);
        let config = DriverConfig {
            secure_log: true,
            ..Default::default()
        };
        let device = OteDevice::probe(tlk, &config).unwrap();
        let user = FakeUserMemory::new();
        let handle = device.open();
        open_session(&device, handle, &user);
    }
}
