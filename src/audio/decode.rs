//! Container and codec decoding via Symphonia.

use std::io::Cursor;

use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::error::{EngineError, Result};

/// Interleaved PCM as it came out of the decoder.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Decode a complete in-memory audio file to interleaved f32 PCM.
///
/// Corrupt packets inside an otherwise readable stream are skipped; a stream
/// that cannot be probed or opened at all is a [`EngineError::DecodeFailure`].
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedAudio> {
    let cursor = Cursor::new(bytes.to_vec());
    let source = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::DecodeFailure(e.to_string()))?;
    let mut format = probed.format;

    let (codec_params, track_id) = {
        let track = format
            .default_track()
            .ok_or_else(|| EngineError::DecodeFailure("no default audio track".to_string()))?;
        (track.codec_params.clone(), track.id)
    };

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| EngineError::DecodeFailure("source sample rate unknown".to_string()))?;
    let channels = codec_params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| EngineError::DecodeFailure("channel layout unknown".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::DecodeFailure(e.to_string()))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(_) => break,
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(_) => continue,
        };

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}
