use bytes::Bytes;
use ffmpeg_next::Rational;
use ffmpeg_next::codec::packet::{Flags, Packet};

/// One undecoded capture sample, wrapped as an FFmpeg packet so the decode
/// context can consume it directly. Carries the capture time base.
pub struct RawUnit {
    packet: Packet,
    time_base: Rational,
}

impl RawUnit {
    /// Builds the packet from the raw capture bytes. `stream_time` and
    /// `duration` arrive as ticks at the time-base denominator scale; both
    /// are normalized into time-base units here. Every raw sample is a
    /// keyframe.
    pub fn from_capture(
        data: &[u8],
        stream_time: i64,
        duration: i64,
        time_base: Rational,
        stream_index: usize,
    ) -> Self {
        let num = i64::from(time_base.numerator()).max(1);
        let mut packet = Packet::copy(data);
        packet.set_pts(Some(stream_time / num));
        packet.set_dts(Some(stream_time / num));
        packet.set_duration(duration / num);
        packet.set_stream(stream_index);
        packet.set_flags(Flags::KEY);
        Self { packet, time_base }
    }

    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }

    pub fn duration(&self) -> i64 {
        self.packet.duration()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn data(&self) -> Bytes {
        self.packet
            .data()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }
}

/// One encoded packet on its way to the muxer, tagged with the encoder time
/// base so the writer can rescale into the container stream's time base.
pub struct EncodedPacket {
    packet: Packet,
    time_base: Rational,
}

impl EncodedPacket {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }

    pub fn duration(&self) -> i64 {
        self.packet.duration()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }
}

impl From<(Packet, Rational)> for EncodedPacket {
    fn from((packet, time_base): (Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}
