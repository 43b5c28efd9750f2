//! Protocol session state machine.

use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
};

use robert_core::{
    Epoch, EpochClock, EpochStore, PersistedSession, ProximityRecorder, ProximityStore,
    RawReception, RecordOutcome, SessionStore, StatusRecord, StoredSecrets, env::Environment,
    group_contacts,
};
use robert_crypto::{
    KeyPair, RegistrationSecrets, RequestKind, derive_secrets, open_tuples, request_mac,
};
use robert_proto::{
    ContactPayload, DeleteExposureHistoryRequest, ProtoError, RegisterRequest, ReportRequest,
    StatusRequest, UnregisterRequest, b64_decode, b64_encode,
    time::{encode_time, ntp_time32},
    tuples::decode_tuples,
};
use tokio::sync::broadcast;

use crate::{
    api::ServerApi,
    config::SessionConfig,
    error::{ApiError, SessionError},
    event::{Health, Operation, ReportReceipt, SessionEvent, SessionState, StatusOutcome},
    gate::{OperationGate, OperationGuard},
};

/// A device's protocol session.
///
/// Constructed once at startup and shared (e.g. behind an `Arc`) with the UI
/// and radio layers. All methods take `&self`.
pub struct Session<A, S, P, E> {
    api: A,
    store: S,
    recorder: ProximityRecorder<P, E>,
    env: E,
    config: SessionConfig,
    persisted: Mutex<PersistedSession>,
    gate: OperationGate,
    events: broadcast::Sender<SessionEvent>,
    observed: Mutex<SessionState>,
}

impl<A, S, P, E> Session<A, S, P, E>
where
    A: ServerApi,
    S: SessionStore,
    P: ProximityStore,
    E: Environment,
{
    /// Restore the session from `store`.
    ///
    /// A stored value claiming registration without secrets or an epoch clock
    /// is reset to unregistered (the sick flag is kept). A reported device
    /// still holding registration material has it dropped along with its
    /// proximities.
    pub fn open(
        api: A,
        store: S,
        proximities: P,
        env: E,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let mut persisted = store.load()?.unwrap_or_default();
        if !persisted.is_consistent() {
            tracing::warn!("stored session registered without key material, resetting");
            persisted.reset_registration();
            store.save(&persisted)?;
        }
        let recorder = ProximityRecorder::new(proximities, env.clone());
        if persisted.registered && persisted.sick {
            persisted.reset_registration();
            store.save(&persisted)?;
            let erased = recorder.clear_all()?;
            tracing::warn!(erased, "reported device was still registered, cleared locally");
        }

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let state = stable_state(&persisted);

        Ok(Self {
            api,
            store,
            recorder,
            env,
            config,
            persisted: Mutex::new(persisted),
            gate: OperationGate::default(),
            events,
            observed: Mutex::new(state),
        })
    }

    /// Current lifecycle state, including transient in-flight states.
    pub fn state(&self) -> SessionState {
        match self.gate.current() {
            Some(Operation::Register) => SessionState::Registering,
            Some(Operation::Report) => SessionState::Reporting,
            Some(Operation::Unregister) => SessionState::Unregistering,
            _ => stable_state(&self.persisted()),
        }
    }

    /// Whether a positive report has been accepted from this device.
    pub fn is_sick(&self) -> bool {
        self.persisted().sick
    }

    /// Result of the last successful status check.
    pub fn last_status(&self) -> Option<StatusRecord> {
        self.persisted().last_status.clone()
    }

    /// Number of stored epochs.
    pub fn epoch_count(&self) -> usize {
        self.persisted().epochs.len()
    }

    /// Epoch the radio layer should advertise at `now_unix`, if registered,
    /// not reported sick, and material for that epoch is stored.
    pub fn broadcast_identifier(&self, now_unix: u64) -> Option<Epoch> {
        let persisted = self.persisted();
        if !persisted.registered || persisted.sick {
            return None;
        }
        persisted.epochs.epoch_at(now_unix).copied()
    }

    /// Subscribe to state and outcome notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Recorder shared with the radio layer.
    pub fn recorder(&self) -> &ProximityRecorder<P, E> {
        &self.recorder
    }

    /// Record one radio reception. Independent of any in-flight operation.
    pub fn record_proximity(&self, reception: RawReception) -> Result<RecordOutcome, SessionError> {
        Ok(self.recorder.record(reception)?)
    }

    /// Drop proximity records older than the configured retention.
    pub fn prune_proximities(&self) -> Result<usize, SessionError> {
        Ok(self.recorder.prune_older_than(self.config.retention)?)
    }

    /// Erase every recorded proximity at the user's request.
    pub fn erase_local_proximities(&self) -> Result<usize, SessionError> {
        Ok(self.recorder.clear_all()?)
    }

    /// Register with the server using a solved captcha.
    ///
    /// All-or-nothing: on any failure nothing is persisted and the ephemeral
    /// key pair is discarded.
    pub async fn register(&self, captcha_id: &str, captcha: &str) -> Result<(), SessionError> {
        let result = self.register_exclusive(captcha_id, captcha).await;
        self.settle(Operation::Register, &result);
        result
    }

    /// Ask the server whether any recorded contact was reported sick.
    ///
    /// Prunes expired proximities first, uploads the full export, then merges
    /// fresh epoch material. Resolves to [`SessionError::Preempted`] if a
    /// report starts meanwhile.
    pub async fn check_status(&self) -> Result<StatusOutcome, SessionError> {
        let result = self.check_status_exclusive().await;
        if let Ok(outcome) = &result {
            self.emit(SessionEvent::StatusChecked(*outcome));
        }
        self.settle(Operation::CheckStatus, &result);
        result
    }

    /// Self-report a positive diagnosis with a verification code, then
    /// unregister.
    ///
    /// Takes priority over a running status check. On `InvalidCode` nothing
    /// changes locally. Once the server accepts the report the device is
    /// marked sick and its registration material and proximities are cleared
    /// in one step, before the coupled unregister reaches out to the server.
    /// Dropping the future during that unregister leaves the device
    /// unregistered locally.
    pub async fn report(&self, code: &str) -> Result<ReportReceipt, SessionError> {
        let result = self.report_exclusive(code).await;
        self.settle(Operation::Report, &result);
        result
    }

    /// Unregister from the server and erase local secrets, epochs and
    /// proximities.
    ///
    /// Local cleanup happens first, so it holds even when the server cannot
    /// be reached after the configured attempts; the network error is still
    /// returned.
    pub async fn unregister(&self) -> Result<(), SessionError> {
        let result = self.unregister_exclusive().await;
        self.settle(Operation::Unregister, &result);
        result
    }

    /// Ask the server to forget this device's exposure history and drop the
    /// cached status.
    pub async fn delete_exposure_history(&self) -> Result<(), SessionError> {
        let result = self.delete_exposure_history_exclusive().await;
        self.settle(Operation::DeleteExposureHistory, &result);
        result
    }

    async fn register_exclusive(
        &self,
        captcha_id: &str,
        captcha: &str,
    ) -> Result<(), SessionError> {
        let _guard = self.acquire(Operation::Register)?;
        let persisted_state = stable_state(&self.persisted());
        if persisted_state != SessionState::Unregistered || self.is_sick() {
            return Err(SessionError::InvalidState {
                state: persisted_state,
                operation: Operation::Register,
            });
        }
        self.publish_state();
        self.register_inner(captcha_id, captcha).await
    }

    async fn check_status_exclusive(&self) -> Result<StatusOutcome, SessionError> {
        let guard = self.acquire(Operation::CheckStatus)?;
        self.require_registered(Operation::CheckStatus)?;

        tokio::select! {
            biased;
            () = guard.preempted() => Err(SessionError::Preempted),
            result = self.check_status_inner() => result,
        }
    }

    async fn report_exclusive(&self, code: &str) -> Result<ReportReceipt, SessionError> {
        let guard = self
            .gate
            .acquire_preempting(Operation::Report, Operation::CheckStatus)
            .await
            .map_err(SessionError::OperationInProgress)?;

        let persisted_state = stable_state(&self.persisted());
        if persisted_state != SessionState::Registered(Health::Healthy) {
            return Err(SessionError::InvalidState {
                state: persisted_state,
                operation: Operation::Report,
            });
        }
        self.publish_state();
        self.report_inner(code, &guard).await
    }

    async fn unregister_exclusive(&self) -> Result<(), SessionError> {
        let _guard = self.acquire(Operation::Unregister)?;
        self.require_registered(Operation::Unregister)?;
        self.publish_state();
        self.unregister_inner(false).await
    }

    async fn delete_exposure_history_exclusive(&self) -> Result<(), SessionError> {
        let _guard = self.acquire(Operation::DeleteExposureHistory)?;
        self.require_registered(Operation::DeleteExposureHistory)?;
        self.delete_exposure_history_inner().await
    }

    async fn register_inner(&self, captcha_id: &str, captcha: &str) -> Result<(), SessionError> {
        let mut entropy = Ok(());
        let generated = KeyPair::generate(|buf| {
            if entropy.is_ok() {
                entropy = self.env.try_random_bytes(buf);
            }
        });
        entropy.map_err(|e| SessionError::KeyGenerationFailed(e.to_string()))?;
        let key_pair = generated?;
        let request = RegisterRequest {
            captcha: captcha.to_owned(),
            captcha_id: captcha_id.to_owned(),
            client_public_ecdh_key: b64_encode(&key_pair.public_key_der()?),
        };

        let response = self.call(Operation::Register, self.api.register(&request)).await?;

        let server_key =
            b64_decode("serverPublicECDHKey", &response.server_public_ecdh_key).map_err(malformed)?;
        let secrets = derive_secrets(key_pair.into_private_key(), &server_key)?;
        let time_start = response.time_start;
        let clock = EpochClock::from_ntp_start(time_start).ok_or_else(|| {
            SessionError::MalformedResponse(format!("timeStart {time_start} precedes 1970"))
        })?;
        let epochs = open_epochs(&secrets, &response.tuples)?;
        if epochs.is_empty() {
            return Err(SessionError::MalformedResponse("registration carried no epochs".into()));
        }

        let received = epochs.len();
        self.commit(|session| {
            let mut store = EpochStore::new(clock);
            store.upsert(epochs);
            session.registered = true;
            session.secrets = Some(StoredSecrets::from_secrets(&secrets));
            session.epochs = store;
            session.last_status = None;
            Ok(())
        })?;

        tracing::info!(epochs = received, "registered");
        Ok(())
    }

    async fn check_status_inner(&self) -> Result<StatusOutcome, SessionError> {
        self.recorder.prune_older_than(self.config.retention)?;

        let now = self.env.wall_clock_secs();
        let (epoch, secrets) = self.auth_material(Operation::CheckStatus, now)?;
        let time = ntp_time32(now);
        let mac =
            request_mac(secrets.mac_key(), RequestKind::Status, &epoch.ebid, epoch.index, time);

        let snapshot = self.recorder.export_all()?;
        let contacts = group_contacts(&snapshot)?;
        drop(snapshot);
        let uploaded = contacts.len();

        let request = StatusRequest {
            ebid: b64_encode(&epoch.ebid),
            epoch_id: epoch.index,
            time: encode_time(time),
            mac: b64_encode(&mac),
            contacts: ContactPayload::encode(contacts, self.config.contact_encoding)
                .map_err(encoding)?,
        };

        let response = self.call(Operation::CheckStatus, self.api.status(&request)).await?;
        let fresh = open_epochs(&secrets, &response.tuples)?;
        let fresh_count = fresh.len();

        let record = StatusRecord {
            at_risk: response.at_risk,
            last_exposure_timeframe: response.last_exposure_timeframe,
            message: response.message,
            checked_at: now,
        };
        let outcome = if record.at_risk {
            StatusOutcome::AtRisk { last_exposure_timeframe: record.last_exposure_timeframe }
        } else {
            StatusOutcome::NotAtRisk
        };

        self.commit(|session| {
            session.epochs.upsert(fresh);
            session.last_status = Some(record);
            Ok(())
        })?;

        tracing::info!(?outcome, contacts = uploaded, new_epochs = fresh_count, "status checked");
        Ok(outcome)
    }

    async fn report_inner(
        &self,
        code: &str,
        guard: &OperationGuard<'_>,
    ) -> Result<ReportReceipt, SessionError> {
        let snapshot = self.recorder.export_all()?;
        let contacts = group_contacts(&snapshot)?;
        drop(snapshot);
        let uploaded = contacts.len();

        let request = ReportRequest {
            token: code.to_owned(),
            contacts: ContactPayload::encode(contacts, self.config.contact_encoding)
                .map_err(encoding)?,
        };

        let response = self.call(Operation::Report, self.api.report(&request)).await?;
        if !response.success {
            return Err(SessionError::InvalidCode);
        }

        tracing::info!(contacts = uploaded, "report accepted");

        guard.switch_to(Operation::Unregister);
        self.publish_state();

        match self.unregister_inner(true).await {
            Ok(()) => Ok(ReportReceipt { unregistered_remotely: true }),
            Err(err @ SessionError::StorageUnavailable(_)) => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "unregister after report failed, local data cleared");
                Ok(ReportReceipt { unregistered_remotely: false })
            },
        }
    }

    /// Clears registration material and proximities locally, then tells the
    /// server using the material captured beforehand.
    async fn unregister_inner(&self, mark_sick: bool) -> Result<(), SessionError> {
        let material = self.auth_material(Operation::Unregister, self.env.wall_clock_secs());

        self.commit(|session| {
            session.sick |= mark_sick;
            session.reset_registration();
            Ok(())
        })?;
        let erased = self.recorder.clear_all();

        let remote = match material {
            Ok((epoch, secrets)) => self.send_unregister(epoch, &secrets).await,
            Err(err) => Err(err),
        };
        let erased = erased?;

        match &remote {
            Ok(()) => tracing::info!(erased, "unregistered"),
            Err(err) => tracing::warn!(error = %err, erased, "unregistered locally only"),
        }
        remote
    }

    async fn send_unregister(
        &self,
        epoch: Epoch,
        secrets: &RegistrationSecrets,
    ) -> Result<(), SessionError> {
        let attempts = self.config.unregister_attempts.max(1);
        let mut attempt = 1;

        loop {
            let time = ntp_time32(self.env.wall_clock_secs());
            let mac = request_mac(
                secrets.mac_key(),
                RequestKind::Unregister,
                &epoch.ebid,
                epoch.index,
                time,
            );
            let request = UnregisterRequest {
                epoch_id: epoch.index,
                ebid: b64_encode(&epoch.ebid),
                time: encode_time(time),
                mac: b64_encode(&mac),
            };

            let result = self
                .call(Operation::Unregister, self.api.unregister(&request))
                .await
                .and_then(|response| success_or_rejected(response.success, response.message));

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::debug!(attempt, error = %err, "unregister attempt failed, retrying");
                    attempt += 1;
                    self.env.sleep(self.config.unregister_retry_backoff).await;
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn delete_exposure_history_inner(&self) -> Result<(), SessionError> {
        let now = self.env.wall_clock_secs();
        let (epoch, secrets) = self.auth_material(Operation::DeleteExposureHistory, now)?;
        let time = ntp_time32(now);
        let mac = request_mac(
            secrets.mac_key(),
            RequestKind::DeleteExposureHistory,
            &epoch.ebid,
            epoch.index,
            time,
        );
        let request = DeleteExposureHistoryRequest {
            ebid: b64_encode(&epoch.ebid),
            time: encode_time(time),
            mac: b64_encode(&mac),
        };

        let response = self
            .call(Operation::DeleteExposureHistory, self.api.delete_exposure_history(&request))
            .await?;
        success_or_rejected(response.success, response.message)?;

        self.commit(|session| {
            session.last_status = None;
            Ok(())
        })?;
        tracing::info!("exposure history deleted");
        Ok(())
    }

    /// Bound a server exchange by the configured timeout.
    async fn call<T>(
        &self,
        operation: Operation,
        exchange: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.config.request_timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(SessionError::from_api(err, operation)),
            Err(_) => Err(SessionError::NetworkFailure(format!(
                "{operation} timed out after {:?}",
                self.config.request_timeout
            ))),
        }
    }

    /// Apply `change` to a copy of the persisted state, save it, then publish
    /// it. Nothing is visible unless the save succeeds.
    fn commit(
        &self,
        change: impl FnOnce(&mut PersistedSession) -> Result<(), SessionError>,
    ) -> Result<(), SessionError> {
        let mut current = self.persisted();
        let mut next = current.clone();
        change(&mut next)?;
        self.store.save(&next)?;
        *current = next;
        Ok(())
    }

    /// Epoch and secrets authenticating a request sent at `now`.
    fn auth_material(
        &self,
        operation: Operation,
        now: u64,
    ) -> Result<(Epoch, RegistrationSecrets), SessionError> {
        let persisted = self.persisted();
        let Some(secrets) = persisted.secrets.as_ref().map(StoredSecrets::to_secrets) else {
            return Err(SessionError::InvalidState { state: stable_state(&persisted), operation });
        };
        let epoch =
            persisted.epochs.for_request(now).copied().ok_or(SessionError::NoEpochMaterial)?;
        Ok((epoch, secrets))
    }

    fn acquire(&self, operation: Operation) -> Result<OperationGuard<'_>, SessionError> {
        self.gate.try_acquire(operation).map_err(SessionError::OperationInProgress)
    }

    fn require_registered(&self, operation: Operation) -> Result<(), SessionError> {
        let state = stable_state(&self.persisted());
        if state.is_registered() {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state, operation })
        }
    }

    fn persisted(&self) -> MutexGuard<'_, PersistedSession> {
        self.persisted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle<T>(&self, operation: Operation, result: &Result<T, SessionError>) {
        if let Err(error) = result {
            tracing::debug!(%operation, %error, "operation failed");
            self.emit(SessionEvent::OperationFailed { operation, error: error.clone() });
        }
        self.publish_state();
    }

    /// Emit `StateChanged` if the observable state moved since the last call.
    fn publish_state(&self) {
        let to = self.state();
        let from = {
            let mut observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *observed, to)
        };
        if from != to {
            tracing::debug!(?from, ?to, "state changed");
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}

fn stable_state(persisted: &PersistedSession) -> SessionState {
    match (persisted.registered, persisted.sick) {
        (false, _) => SessionState::Unregistered,
        (true, false) => SessionState::Registered(Health::Healthy),
        (true, true) => SessionState::Registered(Health::Sick),
    }
}

fn open_epochs(secrets: &RegistrationSecrets, tuples: &str) -> Result<Vec<Epoch>, SessionError> {
    if tuples.is_empty() {
        return Ok(Vec::new());
    }
    let sealed = b64_decode("tuples", tuples).map_err(malformed)?;
    let plaintext = open_tuples(secrets.enc_key(), &sealed)?;
    decode_tuples(&plaintext)
        .map_err(malformed)?
        .iter()
        .map(|tuple| Epoch::from_tuple(tuple).map_err(malformed))
        .collect()
}

fn success_or_rejected(success: bool, message: Option<String>) -> Result<(), SessionError> {
    if success {
        Ok(())
    } else {
        Err(SessionError::ServerRejected { status: 200, message: message.unwrap_or_default() })
    }
}

fn malformed(err: ProtoError) -> SessionError {
    SessionError::MalformedResponse(err.to_string())
}

fn encoding(err: ProtoError) -> SessionError {
    SessionError::Encoding(err.to_string())
}
