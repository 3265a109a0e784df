//! Two-party completion confirmation: the slide gesture and the driver's
//! staged photo evidence.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::lifecycle::{InProgressStage, Phase};
use crate::model::{Order, PhotoFile, PhotoStage, Role};

pub const COMMIT_RATIO_NUM: f64 = 9.0;
pub const COMMIT_RATIO_DEN: f64 = 10.0;
pub const ALLOWED_PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "webp"];
pub const MAX_PHOTO_BYTES: usize = 10 * 1024 * 1024;
pub const PHOTO_FIELD_NAME: &str = "photos";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum SlideState {
    #[default]
    Pending,
    Dragging {
        distance: f64,
    },
    /// `acknowledged` is false while the confirmation request is in flight.
    Confirmed {
        acknowledged: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideOutcome {
    Ignored,
    Moved,
    /// Released short of the threshold. No request.
    Reset,
    /// Released past the threshold. Exactly one request must follow.
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlideConfirm {
    state: SlideState,
    track: f64,
}

impl SlideConfirm {
    /// `track` is the maximum drag distance in shell units.
    #[must_use]
    pub fn new(track: f64) -> Self {
        Self {
            state: SlideState::Pending,
            track: if track.is_finite() && track > 0.0 { track } else { 0.0 },
        }
    }

    /// A control for an order the server already reports as confirmed.
    #[must_use]
    pub fn confirmed() -> Self {
        Self {
            state: SlideState::Confirmed { acknowledged: true },
            track: 0.0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SlideState {
        self.state
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self.state, SlideState::Confirmed { .. })
    }

    /// Drag progress in `0.0..=1.0`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self.state {
            SlideState::Pending => 0.0,
            SlideState::Dragging { distance } if self.track > 0.0 => distance / self.track,
            SlideState::Dragging { .. } => 0.0,
            SlideState::Confirmed { .. } => 1.0,
        }
    }

    pub fn begin(&mut self, track: f64) -> SlideOutcome {
        if self.is_locked() || !(track.is_finite() && track > 0.0) {
            return SlideOutcome::Ignored;
        }
        self.track = track;
        self.state = SlideState::Dragging { distance: 0.0 };
        SlideOutcome::Moved
    }

    pub fn drag_to(&mut self, distance: f64) -> SlideOutcome {
        match self.state {
            SlideState::Dragging { .. } => {
                let distance = if distance.is_finite() {
                    distance.clamp(0.0, self.track)
                } else {
                    0.0
                };
                self.state = SlideState::Dragging { distance };
                SlideOutcome::Moved
            }
            _ => SlideOutcome::Ignored,
        }
    }

    /// Commits iff the knob travelled at least 90% of the track.
    pub fn release(&mut self) -> SlideOutcome {
        let SlideState::Dragging { distance } = self.state else {
            return SlideOutcome::Ignored;
        };
        if self.track > 0.0 && distance * COMMIT_RATIO_DEN >= self.track * COMMIT_RATIO_NUM {
            self.state = SlideState::Confirmed { acknowledged: false };
            SlideOutcome::Commit
        } else {
            self.state = SlideState::Pending;
            SlideOutcome::Reset
        }
    }

    pub fn acknowledge(&mut self) {
        if matches!(self.state, SlideState::Confirmed { .. }) {
            self.state = SlideState::Confirmed { acknowledged: true };
        }
    }

    /// The request failed before the server acknowledged it.
    pub fn reject(&mut self) {
        if self.state == (SlideState::Confirmed { acknowledged: false }) {
            self.state = SlideState::Pending;
        }
    }

    /// Aligns the control with the server's flag. A confirmed flag wins and
    /// nothing reopens the control afterwards.
    pub fn reconcile(&mut self, server_confirmed: bool) {
        if server_confirmed {
            self.state = SlideState::Confirmed { acknowledged: true };
        }
    }
}

impl Default for SlideConfirm {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// What the driver is asked to do next on an in-progress order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceStep {
    UploadLoading,
    UploadUnloading,
    SlideToComplete,
    AwaitingCustomer,
    Done,
}

impl EvidenceStep {
    #[must_use]
    pub fn of(order: &Order) -> Option<Self> {
        if order.status.phase() != Phase::InProgress {
            return None;
        }
        Some(match InProgressStage::of(order) {
            InProgressStage::AwaitingLoading => Self::UploadLoading,
            InProgressStage::AwaitingUnloading => Self::UploadUnloading,
            InProgressStage::AwaitingDriverCompletion | InProgressStage::AwaitingDriver => {
                Self::SlideToComplete
            }
            InProgressStage::AwaitingCustomer => Self::AwaitingCustomer,
            InProgressStage::BothConfirmed => Self::Done,
        })
    }

    #[must_use]
    pub const fn photo_stage(self) -> Option<PhotoStage> {
        match self {
            Self::UploadLoading => Some(PhotoStage::Loading),
            Self::UploadUnloading => Some(PhotoStage::Unloading),
            _ => None,
        }
    }
}

/// Whether `role` may slide on this order right now.
#[must_use]
pub fn can_slide(order: &Order, role: Role) -> bool {
    if order.status.phase() != Phase::InProgress || order.confirmed_by(role) {
        return false;
    }
    match role {
        Role::Customer => true,
        Role::Driver => EvidenceStep::of(order) == Some(EvidenceStep::SlideToComplete),
    }
}

/// A validated set of photos for one upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoBatch {
    pub stage: PhotoStage,
    files: Vec<PhotoFile>,
}

impl PhotoBatch {
    pub fn new(stage: PhotoStage, files: Vec<PhotoFile>, max_files: usize) -> Result<Self, ValidationError> {
        if files.is_empty() || files.len() > max_files {
            return Err(ValidationError::PhotoCount { max: max_files });
        }
        for file in &files {
            let ext = file
                .file_name
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
                .unwrap_or_default();
            if !ALLOWED_PHOTO_EXTENSIONS.contains(&ext.as_str()) {
                return Err(ValidationError::PhotoType(file.file_name.clone()));
            }
            if file.bytes.len() > MAX_PHOTO_BYTES {
                return Err(ValidationError::TooLong {
                    field: "photo",
                    len: file.bytes.len(),
                    max: MAX_PHOTO_BYTES,
                });
            }
        }
        Ok(Self { stage, files })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Encodes the batch as `multipart/form-data`, one `photos` part per file
    /// plus a `telegram_id` field. Returns the content type and the body.
    #[must_use]
    pub fn to_multipart(&self, telegram_id: i64, boundary: &str) -> (String, Vec<u8>) {
        let mut body = Vec::with_capacity(self.files.iter().map(|f| f.bytes.len() + 256).sum::<usize>() + 128);

        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"telegram_id\"\r\n\r\n");
        body.extend_from_slice(telegram_id.to_string().as_bytes());
        body.extend_from_slice(b"\r\n");

        for file in &self.files {
            let name = file.file_name.replace(['"', '\r', '\n'], "_");
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{PHOTO_FIELD_NAME}\"; filename=\"{name}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes());
            body.extend_from_slice(&file.bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        (format!("multipart/form-data; boundary={boundary}"), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::OrderStatus;
    use crate::model::UserId;
    use proptest::prelude::*;

    fn photo(name: &str) -> PhotoFile {
        PhotoFile {
            file_name: name.into(),
            content_type: "image/jpeg".into(),
            bytes: vec![0xff, 0xd8, 0xff],
        }
    }

    fn in_progress() -> Order {
        Order {
            status: OrderStatus::InProgress,
            winner_driver_id: Some(UserId(2)),
            ..Order::default()
        }
    }

    mod slide_tests {
        use super::*;

        #[test]
        fn test_commit_at_ninety_percent() {
            let mut slide = SlideConfirm::new(300.0);
            slide.begin(300.0);
            slide.drag_to(270.0);
            assert_eq!(slide.release(), SlideOutcome::Commit);
            assert_eq!(slide.state(), SlideState::Confirmed { acknowledged: false });
        }

        #[test]
        fn test_just_below_threshold_resets() {
            let mut slide = SlideConfirm::new(1000.0);
            slide.begin(1000.0);
            slide.drag_to(899.0);
            assert_eq!(slide.release(), SlideOutcome::Reset);
            assert_eq!(slide.state(), SlideState::Pending);
        }

        #[test]
        fn test_drag_is_clamped_to_track() {
            let mut slide = SlideConfirm::new(100.0);
            slide.begin(100.0);
            slide.drag_to(500.0);
            assert_eq!(slide.progress(), 1.0);
            slide.drag_to(-20.0);
            assert_eq!(slide.progress(), 0.0);
        }

        #[test]
        fn test_release_without_drag_is_ignored() {
            let mut slide = SlideConfirm::new(100.0);
            assert_eq!(slide.release(), SlideOutcome::Ignored);
            assert_eq!(slide.drag_to(50.0), SlideOutcome::Ignored);
        }

        #[test]
        fn test_failure_before_ack_reopens() {
            let mut slide = SlideConfirm::new(100.0);
            slide.begin(100.0);
            slide.drag_to(100.0);
            slide.release();
            slide.reject();
            assert_eq!(slide.state(), SlideState::Pending);
        }

        #[test]
        fn test_acknowledged_commit_cannot_reopen() {
            let mut slide = SlideConfirm::new(100.0);
            slide.begin(100.0);
            slide.drag_to(95.0);
            slide.release();
            slide.acknowledge();
            slide.reject();
            slide.reconcile(false);
            assert_eq!(slide.state(), SlideState::Confirmed { acknowledged: true });
            assert_eq!(slide.begin(100.0), SlideOutcome::Ignored);
        }

        #[test]
        fn test_server_flag_forces_confirmed() {
            let mut slide = SlideConfirm::new(100.0);
            slide.begin(100.0);
            slide.drag_to(10.0);
            slide.reconcile(true);
            assert!(slide.is_locked());
            assert_eq!(slide.release(), SlideOutcome::Ignored);
        }

        #[test]
        fn test_zero_track_never_commits() {
            let mut slide = SlideConfirm::new(0.0);
            assert_eq!(slide.begin(0.0), SlideOutcome::Ignored);
            assert_eq!(slide.release(), SlideOutcome::Ignored);
        }
    }

    mod evidence_tests {
        use super::*;

        #[test]
        fn test_steps_follow_server_timestamps() {
            let mut o = in_progress();
            assert_eq!(EvidenceStep::of(&o), Some(EvidenceStep::UploadLoading));
            assert_eq!(EvidenceStep::UploadLoading.photo_stage(), Some(PhotoStage::Loading));
            o.loading_confirmed_at = Some("t".into());
            assert_eq!(EvidenceStep::of(&o), Some(EvidenceStep::UploadUnloading));
            o.unloading_confirmed_at = Some("t".into());
            assert_eq!(EvidenceStep::of(&o), Some(EvidenceStep::SlideToComplete));
            assert!(can_slide(&o, Role::Driver));
            o.driver_confirmed = true;
            assert_eq!(EvidenceStep::of(&o), Some(EvidenceStep::AwaitingCustomer));
            assert!(!can_slide(&o, Role::Driver));
        }

        #[test]
        fn test_driver_cannot_slide_before_evidence() {
            let o = in_progress();
            assert!(!can_slide(&o, Role::Driver));
            assert!(can_slide(&o, Role::Customer));
        }

        #[test]
        fn test_no_steps_outside_in_progress() {
            let o = Order {
                status: OrderStatus::Closed,
                ..in_progress()
            };
            assert_eq!(EvidenceStep::of(&o), None);
            assert!(!can_slide(&o, Role::Customer));
        }
    }

    mod photo_tests {
        use super::*;

        #[test]
        fn test_batch_size_limits() {
            assert_eq!(
                PhotoBatch::new(PhotoStage::Loading, vec![], 5).unwrap_err(),
                ValidationError::PhotoCount { max: 5 }
            );
            let six = (0..6).map(|i| photo(&format!("{i}.jpg"))).collect();
            assert!(PhotoBatch::new(PhotoStage::Loading, six, 5).is_err());
            let five = (0..5).map(|i| photo(&format!("{i}.JPG"))).collect();
            assert_eq!(PhotoBatch::new(PhotoStage::Loading, five, 5).unwrap().len(), 5);
        }

        #[test]
        fn test_rejects_non_images() {
            let err = PhotoBatch::new(PhotoStage::Unloading, vec![photo("notes.pdf")], 5).unwrap_err();
            assert_eq!(err, ValidationError::PhotoType("notes.pdf".into()));
            assert!(PhotoBatch::new(PhotoStage::Unloading, vec![photo("noext")], 5).is_err());
        }

        #[test]
        fn test_multipart_layout() {
            let batch = PhotoBatch::new(PhotoStage::Loading, vec![photo("a.jpg"), photo("b.png")], 5).unwrap();
            let (content_type, body) = batch.to_multipart(42, "XYZ");
            assert_eq!(content_type, "multipart/form-data; boundary=XYZ");

            let text = String::from_utf8_lossy(&body);
            assert!(text.starts_with("--XYZ\r\n"));
            assert!(text.ends_with("--XYZ--\r\n"));
            assert_eq!(text.matches("name=\"photos\"").count(), 2);
            assert!(text.contains("filename=\"a.jpg\""));
            assert!(text.contains("name=\"telegram_id\"\r\n\r\n42\r\n"));
        }
    }

    proptest! {
        #[test]
        fn prop_commit_iff_ninety_percent((track, distance) in (10u32..2000).prop_flat_map(|t| (Just(t), 0..=t))) {
            let mut slide = SlideConfirm::new(f64::from(track));
            slide.begin(f64::from(track));
            slide.drag_to(f64::from(distance));
            let outcome = slide.release();
            if u64::from(distance) * 10 >= u64::from(track) * 9 {
                prop_assert_eq!(outcome, SlideOutcome::Commit);
            } else {
                prop_assert_eq!(outcome, SlideOutcome::Reset);
                prop_assert_eq!(slide.state(), SlideState::Pending);
            }
        }
    }
}
