use parking_lot::Mutex;
use streaming::allocator::SlotIndex;
use streaming::source::{INTERPOLATION_SUPPRESSED, Renderer};

struct State {
    buffers: Vec<Vec<f32>>,
    active: Option<(SlotIndex, SlotIndex)>,
    lerp: f32,
    uploads: u64,
}

/// CPU emulation of the globe's slot texture: `N` fixed buffers of one
/// timestep each, plus the two-slot interpolation state the shader reads.
pub struct GpuSlots {
    state: Mutex<State>,
}

impl GpuSlots {
    pub fn new(slots: usize, points: usize) -> Self {
        Self {
            state: Mutex::new(State {
                buffers: vec![vec![0.0; points]; slots],
                active: None,
                lerp: INTERPOLATION_SUPPRESSED,
                uploads: 0,
            }),
        }
    }

    pub fn uploads(&self) -> u64 {
        self.state.lock().uploads
    }

    pub fn active_slots(&self) -> Option<(SlotIndex, SlotIndex)> {
        self.state.lock().active
    }

    pub fn interpolation(&self) -> f32 {
        self.state.lock().lerp
    }

    /// What the shader would draw at `point`; `None` when interpolation is suppressed.
    pub fn sample(&self, point: usize) -> Option<f32> {
        let state = self.state.lock();
        if state.lerp < 0.0 {
            return None;
        }
        let (s0, s1) = state.active?;
        let v0 = *state.buffers.get(s0.0 as usize)?.get(point)?;
        let v1 = *state.buffers.get(s1.0 as usize)?.get(point)?;
        Some(v0 + (v1 - v0) * state.lerp)
    }
}

impl Renderer for GpuSlots {
    fn upload_chunk(&self, slot: SlotIndex, point_offset: usize, points: &[f32]) {
        let mut state = self.state.lock();
        state.uploads += 1;
        let Some(buffer) = state.buffers.get_mut(slot.0 as usize) else {
            tracing::error!("upload to unknown {slot}");
            return;
        };
        let end = (point_offset + points.len()).min(buffer.len());
        if point_offset < end {
            buffer[point_offset..end].copy_from_slice(&points[..end - point_offset]);
        }
    }

    fn set_active_slots(&self, slot0: SlotIndex, slot1: SlotIndex) {
        self.state.lock().active = Some((slot0, slot1));
    }

    fn set_interpolation(&self, lerp: f32) {
        self.state.lock().lerp = lerp;
    }
}
