use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;

use banter_common::{debug, info};

use crate::error::{VoiceError, VoiceResult};

/// A device that plays one encoded clip at a time.
///
/// Playback runs on the device's own thread; callers poll [`is_finished`](AudioOutput::is_finished)
/// and may cut it short with [`stop`](AudioOutput::stop).
pub trait AudioOutput {
    /// Decode `clip` and start playing it, replacing whatever was playing.
    fn start(&mut self, clip: &[u8]) -> VoiceResult<()>;

    /// True once the current clip has drained (or nothing was started).
    fn is_finished(&self) -> bool;

    /// Stop immediately and drop the current clip. No-op when idle.
    fn stop(&mut self);
}

/// Default output device via rodio. A fresh `Sink` is created per clip.
pub struct RodioOutput {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
}

impl RodioOutput {
    pub fn open_default() -> VoiceResult<Self> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!("[voice] Output device ready");
        Ok(Self {
            _stream: stream,
            handle,
            sink: None,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn start(&mut self, clip: &[u8]) -> VoiceResult<()> {
        self.stop();
        let source = rodio::Decoder::new(Cursor::new(clip.to_vec()))
            .map_err(|e| VoiceError::Decode(e.to_string()))?;
        let sink = Sink::try_new(&self.handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        sink.append(source.convert_samples::<f32>());
        debug!("[voice] Playing clip ({} bytes)", clip.len());
        self.sink = Some(sink);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().is_none_or(Sink::empty)
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
            debug!("[voice] Playback stopped");
        }
    }
}
