//! Shared virtual-display manager (§4.E).
//!
//! A ref-counted virtual framebuffer keyed by consumer tag
//! (`appStream`, `desktopStream`, `loginDisplay`). Created lazily on
//! first acquire, destroyed when the last consumer releases, and
//! mutated in place across resolution changes unless the backend
//! forces a recreate — in which case the generation counter advances
//! and every bound stream is notified to rebind.

use std::collections::HashSet;

use thiserror::Error;
use tracing::info;

/// Tag identifying who is holding a reference to the shared display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumer {
    AppStream,
    DesktopStream,
    LoginDisplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Srgb,
    DisplayP3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySnapshot {
    pub display_id: u32,
    pub resolution: Resolution,
    pub refresh_rate: u32,
    pub color_space: ColorSpace,
    pub generation: u64,
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("shared display has no active consumers")]
    NotAcquired,
    #[error("backend failed to create virtual display: {0}")]
    Backend(String),
}

struct Inner {
    display_id: u32,
    resolution: Resolution,
    refresh_rate: u32,
    color_space: ColorSpace,
    generation: u64,
}

/// Callback invoked whenever a recreate bumps the generation.
pub type GenerationChangeHandler = Box<dyn Fn(DisplaySnapshot, u64) + Send + Sync>;

/// Owns the single shared virtual display for the process. Stream
/// contexts never create their own framebuffer; they acquire a
/// reference here and rebind when notified of a generation change.
pub struct SharedDisplayManager {
    inner: Option<Inner>,
    consumers: HashSet<Consumer>,
    next_display_id: u32,
    on_generation_change: Option<GenerationChangeHandler>,
}

impl SharedDisplayManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: None,
            consumers: HashSet::new(),
            next_display_id: 1,
            on_generation_change: None,
        }
    }

    pub fn set_generation_change_handler(&mut self, handler: GenerationChangeHandler) {
        self.on_generation_change = Some(handler);
    }

    /// Acquire a reference for `consumer`, creating the display on the
    /// first caller.
    pub fn acquire(
        &mut self,
        consumer: Consumer,
        resolution: Resolution,
        refresh_rate: u32,
        color_space: ColorSpace,
    ) -> DisplaySnapshot {
        if self.inner.is_none() {
            let display_id = self.next_display_id;
            self.next_display_id += 1;
            info!(display_id, ?resolution, "created shared virtual display");
            self.inner = Some(Inner {
                display_id,
                resolution,
                refresh_rate,
                color_space,
                generation: 0,
            });
        }
        self.consumers.insert(consumer);
        self.snapshot().expect("just created")
    }

    /// Release `consumer`'s reference. Destroys the display once the
    /// last consumer has released.
    pub fn release(&mut self, consumer: Consumer) {
        self.consumers.remove(&consumer);
        if self.consumers.is_empty() {
            if let Some(inner) = self.inner.take() {
                info!(display_id = inner.display_id, "destroyed shared virtual display");
            }
        }
    }

    /// Mutate resolution/refresh in place. If `force_recreate` is set
    /// (backend could not resize without tearing down the
    /// framebuffer), the generation advances and bound streams are
    /// notified via the change handler, but `display_id` is
    /// unchanged — only the generation signals "please rebind".
    pub fn update_resolution(
        &mut self,
        resolution: Resolution,
        refresh_rate: u32,
        force_recreate: bool,
    ) -> Result<DisplaySnapshot, DisplayError> {
        let previous_generation = {
            let inner = self.inner.as_ref().ok_or(DisplayError::NotAcquired)?;
            inner.generation
        };

        {
            let inner = self.inner.as_mut().ok_or(DisplayError::NotAcquired)?;
            inner.resolution = resolution;
            inner.refresh_rate = refresh_rate;
            if force_recreate {
                inner.generation += 1;
            }
        }

        let snapshot = self.snapshot().ok_or(DisplayError::NotAcquired)?;
        if force_recreate {
            if let Some(handler) = &self.on_generation_change {
                handler(snapshot, previous_generation);
            }
        }
        Ok(snapshot)
    }

    /// Current bounds, recomputed from the known resolution if the OS
    /// reports `0x0` (§4.E invariant).
    #[must_use]
    pub fn bounds(&self, os_reported: Resolution) -> Option<Resolution> {
        let inner = self.inner.as_ref()?;
        if os_reported.width == 0 || os_reported.height == 0 {
            Some(inner.resolution)
        } else {
            Some(os_reported)
        }
    }

    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.inner.as_ref().map(|i| i.generation)
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    fn snapshot(&self) -> Option<DisplaySnapshot> {
        self.inner.as_ref().map(|inner| DisplaySnapshot {
            display_id: inner.display_id,
            resolution: inner.resolution,
            refresh_rate: inner.refresh_rate,
            color_space: inner.color_space,
            generation: inner.generation,
        })
    }
}

impl Default for SharedDisplayManager {
    fn default() -> Self {
        Self::new()
    }
}
