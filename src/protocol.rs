//! Thin datagram protocol for incoming audio
//!
//! Every client packet is `version ‖ type ‖ channels ‖ pose` followed by the
//! type-specific payload. Poses are seven little-endian f32s: position xyz,
//! then orientation wxyz. Audio payloads carry exactly one network frame of
//! 16-bit little-endian PCM. Silent frames carry no samples at all; they
//! keep the stream and its pose alive while the client gates its mic.

use es_core::{ChannelFormat, EsError, EsResult, Pose, Quat, Sample, Vec3};

pub const PROTOCOL_VERSION: u8 = 1;

const TYPE_MIC_NO_ECHO: u8 = 1;
const TYPE_MIC_ECHO: u8 = 2;
const TYPE_INJECT: u8 = 3;
const TYPE_SILENT: u8 = 4;

const CHANNELS_MONO: u8 = 0;
const CHANNELS_STEREO: u8 = 1;

const POSE_BYTES: usize = 7 * 4;

/// One parsed client datagram
#[derive(Debug, Clone, PartialEq)]
pub enum IngestPacket {
    Microphone {
        echo: bool,
        format: ChannelFormat,
        pose: Pose,
        samples: Vec<Sample>,
    },
    Silent {
        format: ChannelFormat,
        pose: Pose,
    },
    Inject {
        stream_id: u8,
        format: ChannelFormat,
        pose: Pose,
        radius: f32,
        attenuation_ratio: f32,
        samples: Vec<Sample>,
    },
}

pub fn parse_packet(bytes: &[u8]) -> EsResult<IngestPacket> {
    let mut reader = Reader::new(bytes);

    let version = reader.u8()?;
    if version != PROTOCOL_VERSION {
        return Err(EsError::MalformedPacket(format!(
            "unsupported version {}",
            version
        )));
    }
    let packet_type = reader.u8()?;
    let format = match reader.u8()? {
        CHANNELS_MONO => ChannelFormat::Mono,
        CHANNELS_STEREO => ChannelFormat::Stereo,
        other => {
            return Err(EsError::MalformedPacket(format!(
                "bad channel layout {}",
                other
            )))
        }
    };
    let pose = reader.pose()?;

    match packet_type {
        TYPE_MIC_NO_ECHO | TYPE_MIC_ECHO => {
            let samples = reader.pcm(format)?;
            Ok(IngestPacket::Microphone {
                echo: packet_type == TYPE_MIC_ECHO,
                format,
                pose,
                samples,
            })
        }
        TYPE_SILENT => {
            reader.finish()?;
            Ok(IngestPacket::Silent { format, pose })
        }
        TYPE_INJECT => {
            let stream_id = reader.u8()?;
            let radius = reader.f32()?;
            let attenuation_ratio = reader.f32()?;
            if !(0.0..=1.0).contains(&attenuation_ratio) || radius < 0.0 {
                return Err(EsError::MalformedPacket(
                    "injector parameters out of range".into(),
                ));
            }
            let samples = reader.pcm(format)?;
            Ok(IngestPacket::Inject {
                stream_id,
                format,
                pose,
                radius,
                attenuation_ratio,
                samples,
            })
        }
        other => Err(EsError::MalformedPacket(format!(
            "unknown packet type {}",
            other
        ))),
    }
}

pub fn encode_microphone(echo: bool, pose: Pose, samples: &[Sample]) -> Vec<u8> {
    let format = format_of(samples.len());
    let mut out = header(
        if echo { TYPE_MIC_ECHO } else { TYPE_MIC_NO_ECHO },
        format,
        pose,
    );
    push_pcm(&mut out, samples);
    out
}

pub fn encode_silent(format: ChannelFormat, pose: Pose) -> Vec<u8> {
    header(TYPE_SILENT, format, pose)
}

pub fn encode_inject(
    stream_id: u8,
    pose: Pose,
    radius: f32,
    attenuation_ratio: f32,
    samples: &[Sample],
) -> Vec<u8> {
    let format = format_of(samples.len());
    let mut out = header(TYPE_INJECT, format, pose);
    out.push(stream_id);
    out.extend_from_slice(&radius.to_le_bytes());
    out.extend_from_slice(&attenuation_ratio.to_le_bytes());
    push_pcm(&mut out, samples);
    out
}

fn format_of(sample_count: usize) -> ChannelFormat {
    if sample_count == ChannelFormat::Stereo.samples_per_frame() {
        ChannelFormat::Stereo
    } else {
        ChannelFormat::Mono
    }
}

fn header(packet_type: u8, format: ChannelFormat, pose: Pose) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + POSE_BYTES);
    out.push(PROTOCOL_VERSION);
    out.push(packet_type);
    out.push(match format {
        ChannelFormat::Mono => CHANNELS_MONO,
        ChannelFormat::Stereo => CHANNELS_STEREO,
    });
    for value in [
        pose.position.x,
        pose.position.y,
        pose.position.z,
        pose.orientation.w,
        pose.orientation.x,
        pose.orientation.y,
        pose.orientation.z,
    ] {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn push_pcm(out: &mut Vec<u8>, samples: &[Sample]) {
    for &sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, at: 0 }
    }

    fn take(&mut self, n: usize) -> EsResult<&'a [u8]> {
        if self.at + n > self.bytes.len() {
            return Err(EsError::MalformedPacket("truncated packet".into()));
        }
        let slice = &self.bytes[self.at..self.at + n];
        self.at += n;
        Ok(slice)
    }

    fn u8(&mut self) -> EsResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn f32(&mut self) -> EsResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn pose(&mut self) -> EsResult<Pose> {
        let position = Vec3::new(self.f32()?, self.f32()?, self.f32()?);
        let orientation =
            Quat::new(self.f32()?, self.f32()?, self.f32()?, self.f32()?).normalize();
        Ok(Pose::new(position, orientation))
    }

    fn pcm(&mut self, format: ChannelFormat) -> EsResult<Vec<Sample>> {
        let expected = format.samples_per_frame();
        let bytes = self.take(expected * 2)?;
        self.finish()?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| Sample::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn finish(&self) -> EsResult<()> {
        if self.at != self.bytes.len() {
            return Err(EsError::MalformedPacket("trailing bytes".into()));
        }
        Ok(())
    }
}
