//! In-process ROBERT server for end-to-end tests.
//!
//! Speaks the same wire bodies as the real service and performs the real
//! cryptography: ECDH against the client's public key, HMAC request
//! verification, and AES-GCM sealing of epoch material. Risk evaluation is
//! simplified: a registration is at risk once one of its EBIDs appears in a
//! contact list uploaded by a report.
//!
//! Faults can be queued per endpoint to exercise timeouts, transport errors
//! and server rejections.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use robert_client::{ApiError, ServerApi};
use robert_core::{EBID_SIZE, ECC_SIZE, EpochClock, env::Environment};
use robert_crypto::{
    KeyPair, RegistrationSecrets, RequestKind, TUPLES_NONCE_SIZE, derive_secrets, seal_tuples,
    verify_request_mac,
};
use robert_proto::{
    Contact, DeleteExposureHistoryRequest, EpochKey, EpochTuple, RegisterRequest,
    RegisterResponse, ReportRequest, StatusRequest, StatusResponse, SuccessResponse,
    UnregisterRequest, b64_decode, b64_decode_exact, b64_encode,
    time::{decode_time, unix_to_ntp},
    tuples::encode_tuples,
};

use crate::sim_env::SimEnv;

/// Server endpoints, for fault targeting and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `register`
    Register,
    /// `status`
    Status,
    /// `report`
    Report,
    /// `unregister`
    Unregister,
    /// `deleteExposureHistory`
    DeleteExposureHistory,
}

/// Injected misbehaviour for one call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with this transport error
    Error(ApiError),
    /// Never respond
    Hang,
    /// Respond normally after a delay
    Delay(Duration),
}

struct Registration {
    secrets: RegistrationSecrets,
    ebids: HashSet<[u8; EBID_SIZE]>,
    next_epoch: u32,
    exposed: bool,
    active: bool,
}

struct EpochOwner {
    registration: usize,
    epoch_id: u32,
}

struct ServerState {
    rng: ChaCha20Rng,
    captchas: HashMap<String, String>,
    codes: HashSet<String>,
    registrations: Vec<Registration>,
    owners: HashMap<[u8; EBID_SIZE], EpochOwner>,
    reported_ebids: HashSet<[u8; EBID_SIZE]>,
    faults: HashMap<Endpoint, VecDeque<Fault>>,
    calls: HashMap<Endpoint, usize>,
    last_upload: Option<Vec<Contact>>,
}

/// Simulated server. Clones share state.
#[derive(Clone)]
pub struct SimServer {
    env: SimEnv,
    clock: EpochClock,
    time_start_ntp: u64,
    epochs_per_batch: u32,
    state: Arc<Mutex<ServerState>>,
}

impl SimServer {
    /// Server whose epoch 0 starts at `env`'s current time, issuing four
    /// epochs per batch.
    pub fn new(env: SimEnv) -> Self {
        let start = env.wall_clock_secs();
        Self::with_start(env, start, 4)
    }

    /// Server with an explicit epoch 0 (Unix seconds) and batch size.
    pub fn with_start(env: SimEnv, start_unix: u64, epochs_per_batch: u32) -> Self {
        let time_start_ntp = unix_to_ntp(start_unix);
        let clock = EpochClock::new(start_unix, robert_core::EPOCH_DURATION_SECS);
        Self {
            env,
            clock,
            time_start_ntp,
            epochs_per_batch: epochs_per_batch.max(1),
            state: Arc::new(Mutex::new(ServerState {
                rng: ChaCha20Rng::seed_from_u64(0x5EED),
                captchas: HashMap::new(),
                codes: HashSet::new(),
                registrations: Vec::new(),
                owners: HashMap::new(),
                reported_ebids: HashSet::new(),
                faults: HashMap::new(),
                calls: HashMap::new(),
                last_upload: None,
            })),
        }
    }

    /// Accept `answer` for captcha `id`.
    pub fn add_captcha(&self, id: &str, answer: &str) {
        self.lock().captchas.insert(id.to_owned(), answer.to_owned());
    }

    /// Accept `code` as a report verification code.
    pub fn add_code(&self, code: &str) {
        self.lock().codes.insert(code.to_owned());
    }

    /// Queue a fault for the next call to `endpoint`.
    pub fn inject(&self, endpoint: Endpoint, fault: Fault) {
        self.lock().faults.entry(endpoint).or_default().push_back(fault);
    }

    /// Mark every registration whose EBIDs appear in `contacts` as exposed,
    /// as if another device had reported them.
    pub fn report_contacts(&self, contacts: &[Contact]) {
        let mut state = self.lock();
        flag_exposures(&mut state, contacts);
    }

    /// Calls received on `endpoint`, including faulted ones.
    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.lock().calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// Registrations not yet unregistered.
    pub fn active_registrations(&self) -> usize {
        self.lock().registrations.iter().filter(|r| r.active).count()
    }

    /// Contacts carried by the most recent status or report upload.
    pub fn last_upload(&self) -> Option<Vec<Contact>> {
        self.lock().last_upload.clone()
    }

    /// EBIDs issued to registration `index` (registration order).
    pub fn issued_ebids(&self, index: usize) -> Vec<[u8; EBID_SIZE]> {
        self.lock()
            .registrations
            .get(index)
            .map(|r| r.ebids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and apply any queued fault.
    async fn admit(&self, endpoint: Endpoint) -> Result<(), ApiError> {
        let fault = {
            let mut state = self.lock();
            *state.calls.entry(endpoint).or_default() += 1;
            state.faults.get_mut(&endpoint).and_then(VecDeque::pop_front)
        };
        if let Some(fault) = &fault {
            tracing::debug!(?endpoint, ?fault, "injecting fault");
        }

        match fault {
            None => Ok(()),
            Some(Fault::Error(err)) => Err(err),
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Delay(delay)) => {
                self.env.sleep(delay).await;
                Ok(())
            },
        }
    }

    fn current_epoch(&self) -> u32 {
        self.clock.index_at(self.env.wall_clock_secs()).unwrap_or(0)
    }

    /// Issue the next batch for `registration` and seal it.
    fn issue_batch(&self, state: &mut ServerState, registration: usize) -> String {
        let from = self.current_epoch();
        let Some(next) = state.registrations.get(registration).map(|r| r.next_epoch.max(from))
        else {
            return String::new();
        };

        let mut tuples = Vec::new();
        for epoch_id in next..next + self.epochs_per_batch {
            let mut ebid = [0u8; EBID_SIZE];
            let mut ecc = [0u8; ECC_SIZE];
            state.rng.fill_bytes(&mut ebid);
            state.rng.fill_bytes(&mut ecc);

            state.owners.insert(ebid, EpochOwner { registration, epoch_id });
            if let Some(reg) = state.registrations.get_mut(registration) {
                reg.ebids.insert(ebid);
            }
            tuples.push(EpochTuple {
                epoch_id,
                key: EpochKey { ebid: b64_encode(&ebid), ecc: b64_encode(&ecc) },
            });
        }

        let mut nonce = [0u8; TUPLES_NONCE_SIZE];
        state.rng.fill_bytes(&mut nonce);

        let Some(reg) = state.registrations.get_mut(registration) else {
            return String::new();
        };
        reg.next_epoch = next + self.epochs_per_batch;

        match encode_tuples(&tuples) {
            Ok(plaintext) => b64_encode(&seal_tuples(reg.secrets.enc_key(), &plaintext, nonce)),
            Err(_) => String::new(),
        }
    }
}

#[async_trait]
impl ServerApi for SimServer {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        self.admit(Endpoint::Register).await?;

        let mut state = self.lock();
        if state.captchas.get(&request.captcha_id) != Some(&request.captcha) {
            return Err(rejected(401, "invalid captcha"));
        }

        let client_key = b64_decode("clientPublicECDHKey", &request.client_public_ecdh_key)
            .map_err(|e| rejected(400, &e.to_string()))?;

        let server_pair = {
            let rng = &mut state.rng;
            KeyPair::generate(|buf| rng.fill_bytes(buf))
                .map_err(|e| rejected(500, &e.to_string()))?
        };
        let server_public =
            server_pair.public_key_der().map_err(|e| rejected(500, &e.to_string()))?;
        let secrets = derive_secrets(server_pair.into_private_key(), &client_key)
            .map_err(|e| rejected(400, &e.to_string()))?;

        state.registrations.push(Registration {
            secrets,
            ebids: HashSet::new(),
            next_epoch: 0,
            exposed: false,
            active: true,
        });
        let index = state.registrations.len() - 1;
        let tuples = self.issue_batch(&mut state, index);
        tracing::debug!(registration = index, "device registered");

        Ok(RegisterResponse {
            server_public_ecdh_key: b64_encode(&server_public),
            tuples,
            time_start: self.time_start_ntp,
        })
    }

    async fn status(&self, request: &StatusRequest) -> Result<StatusResponse, ApiError> {
        self.admit(Endpoint::Status).await?;

        let mut state = self.lock();
        let registration = authenticate(
            &state,
            RequestKind::Status,
            &request.ebid,
            Some(request.epoch_id),
            &request.time,
            &request.mac,
        )?;

        let contacts = request
            .contacts
            .clone()
            .into_contacts()
            .map_err(|e| rejected(400, &e.to_string()))?;
        state.last_upload = Some(contacts);

        let exposed = state.registrations.get(registration).is_some_and(|r| r.exposed);
        let tuples = self.issue_batch(&mut state, registration);

        Ok(StatusResponse {
            at_risk: exposed,
            last_exposure_timeframe: exposed.then_some(1),
            message: None,
            tuples,
        })
    }

    async fn report(&self, request: &ReportRequest) -> Result<SuccessResponse, ApiError> {
        self.admit(Endpoint::Report).await?;

        let mut state = self.lock();
        if !state.codes.contains(&request.token) {
            return Err(rejected(401, "invalid code"));
        }

        let contacts = request
            .contacts
            .clone()
            .into_contacts()
            .map_err(|e| rejected(400, &e.to_string()))?;
        flag_exposures(&mut state, &contacts);
        state.last_upload = Some(contacts);

        Ok(SuccessResponse { success: true, message: None })
    }

    async fn unregister(&self, request: &UnregisterRequest) -> Result<SuccessResponse, ApiError> {
        self.admit(Endpoint::Unregister).await?;

        let mut state = self.lock();
        let registration = authenticate(
            &state,
            RequestKind::Unregister,
            &request.ebid,
            Some(request.epoch_id),
            &request.time,
            &request.mac,
        )?;

        let ServerState { registrations, owners, .. } = &mut *state;
        if let Some(reg) = registrations.get_mut(registration) {
            reg.active = false;
            for ebid in &reg.ebids {
                owners.remove(ebid);
            }
        }

        Ok(SuccessResponse { success: true, message: None })
    }

    async fn delete_exposure_history(
        &self,
        request: &DeleteExposureHistoryRequest,
    ) -> Result<SuccessResponse, ApiError> {
        self.admit(Endpoint::DeleteExposureHistory).await?;

        let mut state = self.lock();
        let registration = authenticate(
            &state,
            RequestKind::DeleteExposureHistory,
            &request.ebid,
            None,
            &request.time,
            &request.mac,
        )?;

        if let Some(reg) = state.registrations.get_mut(registration) {
            reg.exposed = false;
        }
        Ok(SuccessResponse { success: true, message: None })
    }
}

/// Resolve the registration owning `ebid` and verify the request MAC.
fn authenticate(
    state: &ServerState,
    kind: RequestKind,
    ebid: &str,
    claimed_epoch: Option<u32>,
    time: &str,
    mac: &str,
) -> Result<usize, ApiError> {
    let ebid =
        b64_decode_exact::<EBID_SIZE>("ebid", ebid).map_err(|e| rejected(400, &e.to_string()))?;
    let time = decode_time(time).map_err(|e| rejected(400, &e.to_string()))?;
    let mac = b64_decode("mac", mac).map_err(|e| rejected(400, &e.to_string()))?;

    let owner = state.owners.get(&ebid).ok_or_else(|| rejected(404, "unknown ebid"))?;
    if claimed_epoch.is_some_and(|epoch| epoch != owner.epoch_id) {
        return Err(rejected(401, "epoch mismatch"));
    }

    let registration = state
        .registrations
        .get(owner.registration)
        .filter(|r| r.active)
        .ok_or_else(|| rejected(404, "registration inactive"))?;

    let key = registration.secrets.mac_key();
    if !verify_request_mac(key, kind, &ebid, owner.epoch_id, time, &mac) {
        return Err(rejected(401, "invalid mac"));
    }
    Ok(owner.registration)
}

fn flag_exposures(state: &mut ServerState, contacts: &[Contact]) {
    for contact in contacts {
        if let Ok(ebid) = b64_decode_exact::<EBID_SIZE>("ebid", &contact.ebid) {
            state.reported_ebids.insert(ebid);
        }
    }

    let ServerState { registrations, reported_ebids, .. } = state;
    for reg in registrations.iter_mut().filter(|r| r.active) {
        if reg.ebids.iter().any(|ebid| reported_ebids.contains(ebid)) {
            reg.exposed = true;
        }
    }
}

fn rejected(status: u16, message: &str) -> ApiError {
    ApiError::Rejected { status, message: message.to_owned() }
}
