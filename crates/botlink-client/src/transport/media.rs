//! Local media device state shared by transports without a media stack.

use parking_lot::Mutex;

use botlink_core::SessionError;
use botlink_core::types::{MediaDeviceId, MediaDeviceInfo, MediaTrackId, ParticipantTracks, Tracks};

#[derive(Default)]
struct MediaState {
    mics: Vec<MediaDeviceInfo>,
    cams: Vec<MediaDeviceInfo>,
    selected_mic: Option<MediaDeviceInfo>,
    selected_cam: Option<MediaDeviceInfo>,
    mic_enabled: bool,
    cam_enabled: bool,
}

/// Device lists, selection, and on/off flags.
#[derive(Default)]
pub struct LocalMedia {
    state: Mutex<MediaState>,
}

impl LocalMedia {
    /// Start with the given enable flags and no devices.
    pub fn new(mic_enabled: bool, cam_enabled: bool) -> Self {
        Self {
            state: Mutex::new(MediaState {
                mic_enabled,
                cam_enabled,
                ..MediaState::default()
            }),
        }
    }

    /// Replace the device lists. The first device of each kind becomes selected
    /// when nothing is selected yet.
    pub fn set_devices(&self, mics: Vec<MediaDeviceInfo>, cams: Vec<MediaDeviceInfo>) {
        let mut state = self.state.lock();
        if state.selected_mic.is_none() {
            state.selected_mic = mics.first().cloned();
        }
        if state.selected_cam.is_none() {
            state.selected_cam = cams.first().cloned();
        }
        state.mics = mics;
        state.cams = cams;
    }

    /// Known microphones.
    pub fn mics(&self) -> Vec<MediaDeviceInfo> {
        self.state.lock().mics.clone()
    }

    /// Known cameras.
    pub fn cams(&self) -> Vec<MediaDeviceInfo> {
        self.state.lock().cams.clone()
    }

    /// Select a microphone by id.
    pub fn select_mic(&self, id: &MediaDeviceId) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let device = find(&state.mics, id)?;
        state.selected_mic = Some(device);
        Ok(())
    }

    /// Select a camera by id.
    pub fn select_cam(&self, id: &MediaDeviceId) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let device = find(&state.cams, id)?;
        state.selected_cam = Some(device);
        Ok(())
    }

    /// Selected microphone.
    pub fn selected_mic(&self) -> Option<MediaDeviceInfo> {
        self.state.lock().selected_mic.clone()
    }

    /// Selected camera.
    pub fn selected_cam(&self) -> Option<MediaDeviceInfo> {
        self.state.lock().selected_cam.clone()
    }

    /// Record the microphone enable flag.
    pub fn set_mic_enabled(&self, enable: bool) {
        self.state.lock().mic_enabled = enable;
    }

    /// Record the camera enable flag.
    pub fn set_cam_enabled(&self, enable: bool) {
        self.state.lock().cam_enabled = enable;
    }

    /// Whether the microphone is on.
    pub fn is_mic_enabled(&self) -> bool {
        self.state.lock().mic_enabled
    }

    /// Whether the camera is on.
    pub fn is_cam_enabled(&self) -> bool {
        self.state.lock().cam_enabled
    }

    /// Local tracks for enabled, selected devices.
    pub fn local_tracks(&self) -> ParticipantTracks {
        let state = self.state.lock();
        let track = |enabled: bool, device: &Option<MediaDeviceInfo>| {
            device
                .as_ref()
                .filter(|_| enabled)
                .map(|d| MediaTrackId(format!("local-{}", d.id.0)))
        };
        ParticipantTracks {
            audio: track(state.mic_enabled, &state.selected_mic),
            video: track(state.cam_enabled, &state.selected_cam),
        }
    }

    /// Session tracks with no remote media.
    pub fn tracks(&self) -> Tracks {
        Tracks {
            local: self.local_tracks(),
            bot: None,
        }
    }
}

fn find(devices: &[MediaDeviceInfo], id: &MediaDeviceId) -> Result<MediaDeviceInfo, SessionError> {
    devices
        .iter()
        .find(|d| &d.id == id)
        .cloned()
        .ok_or_else(|| SessionError::other(format!("unknown media device: {}", id.0)))
}
