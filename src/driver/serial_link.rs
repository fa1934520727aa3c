use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::*;

use super::{ActuatorLink, ObstacleReadings, SetpointFrame, TelemetryFrame, WheelRates};
use crate::error::LinkError;

const REQUEST_PAYLOAD_LEN: usize = 9;
const REPLY_PAYLOAD_LEN: usize = 16;
const FRAME_DELIMITER: u8 = 0;

impl SetpointFrame {
    fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(REQUEST_PAYLOAD_LEN);
        payload.extend_from_slice(&self.left.to_le_bytes());
        payload.extend_from_slice(&self.right.to_le_bytes());
        payload.push(self.mode as u8);

        let mut encoded = postcard_cobs::encode_vec(&payload);
        encoded.push(FRAME_DELIMITER);
        encoded
    }
}

impl TelemetryFrame {
    fn from_payload(mut payload: &[u8]) -> Result<Self, String> {
        if payload.len() != REPLY_PAYLOAD_LEN {
            return Err(format!(
                "expected {} payload bytes, got {}",
                REPLY_PAYLOAD_LEN,
                payload.len()
            ));
        }
        let rates = WheelRates::new(payload.get_f32_le(), payload.get_f32_le());
        let obstacles = ObstacleReadings::new(payload.get_f32_le(), payload.get_f32_le());
        Ok(Self { rates, obstacles })
    }
}

/// A decoded reply. Garbled frames are items rather than decoder errors so the
/// stream survives line noise.
#[derive(Debug, PartialEq)]
pub enum BoardReply {
    Telemetry(TelemetryFrame),
    Garbled(String),
}

/// COBS framed, zero delimited messages.
pub struct BoardProtocol;

impl Decoder for BoardProtocol {
    type Item = BoardReply;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(end) = src.iter().position(|byte| *byte == FRAME_DELIMITER) else {
                return Ok(None);
            };
            let frame = src.split_to(end + 1);
            if end == 0 {
                // stray delimiter between frames
                continue;
            }
            let reply = match postcard_cobs::decode_vec(&frame[..end]) {
                Ok(payload) => match TelemetryFrame::from_payload(&payload) {
                    Ok(telemetry) => BoardReply::Telemetry(telemetry),
                    Err(reason) => BoardReply::Garbled(reason),
                },
                Err(_) => BoardReply::Garbled(String::from("invalid COBS encoding")),
            };
            return Ok(Some(reply));
        }
    }
}

impl Encoder<SetpointFrame> for BoardProtocol {
    type Error = LinkError;

    fn encode(&mut self, data: SetpointFrame, buf: &mut BytesMut) -> Result<(), LinkError> {
        let encoded_data = data.encode();
        buf.reserve(encoded_data.len());
        buf.put_slice(&encoded_data);
        Ok(())
    }
}

/// Request/reply link over any byte stream speaking [`BoardProtocol`].
pub struct FramedActuatorLink<T> {
    framed_port: Framed<T, BoardProtocol>,
    /// a request went out and its reply was never read
    in_flight: bool,
}

pub type SerialActuatorLink = FramedActuatorLink<tokio_serial::SerialStream>;

impl SerialActuatorLink {
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let serial_port = tokio_serial::new(port, baud_rate)
            .open_native_async()
            .map_err(|_| LinkError::FailedOpeningSerialPort(port.to_owned()))?;
        info!("Opened motor controller link on {} at {} baud", port, baud_rate);
        Ok(Self::new(serial_port))
    }
}

impl<T> FramedActuatorLink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: T) -> Self {
        Self {
            framed_port: BoardProtocol.framed(stream),
            in_flight: false,
        }
    }

    /// Drop replies to requests that were abandoned, so the next reply read
    /// belongs to the next request.
    fn discard_stale_replies(&mut self) {
        let mut discarded = 0;
        while let Some(Some(Ok(_))) = self.framed_port.next().now_or_never() {
            discarded += 1;
        }
        self.framed_port.read_buffer_mut().clear();
        debug!("Discarded {} stale replies", discarded);
    }
}

#[async_trait]
impl<T> ActuatorLink for FramedActuatorLink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn exchange(&mut self, request: SetpointFrame) -> Result<TelemetryFrame, LinkError> {
        if self.in_flight {
            self.discard_stale_replies();
        }
        self.in_flight = true;
        self.framed_port.send(request).await?;
        let reply = self.framed_port.next().await;
        self.in_flight = false;
        match reply {
            Some(Ok(BoardReply::Telemetry(telemetry))) => Ok(telemetry),
            Some(Ok(BoardReply::Garbled(reason))) => Err(LinkError::MalformedFrame(reason)),
            Some(Err(err)) => Err(err),
            None => Err(LinkError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LinkMode;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn reply_bytes(values: [f32; 4]) -> Vec<u8> {
        let payload: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        let mut encoded = postcard_cobs::encode_vec(&payload);
        encoded.push(0);
        encoded
    }

    #[test]
    fn encoding_adds_trailing_zero() {
        let encoded = SetpointFrame::default().encode();
        assert_eq!(*encoded.last().unwrap(), 0_u8);
        assert!(!encoded[..encoded.len() - 1].contains(&0));
    }

    #[test]
    fn request_payload_layout() {
        let frame = SetpointFrame::new(12.5, -3.0, LinkMode::Turning);
        let encoded = frame.encode();
        let payload = postcard_cobs::decode_vec(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(payload.len(), REQUEST_PAYLOAD_LEN);
        assert_eq!(&payload[0..4], &12.5_f32.to_le_bytes());
        assert_eq!(&payload[4..8], &(-3.0_f32).to_le_bytes());
        assert_eq!(payload[8], 1);
    }

    #[test]
    fn decode_waits_for_delimiter() {
        let bytes = reply_bytes([1.0, 2.0, 0.5, 0.75]);
        let mut buffer = BytesMut::from(&bytes[..bytes.len() - 1]);
        assert_eq!(BoardProtocol.decode(&mut buffer).unwrap(), None);
        buffer.put_u8(0);
        let reply = BoardProtocol.decode(&mut buffer).unwrap();
        assert_eq!(
            reply,
            Some(BoardReply::Telemetry(TelemetryFrame {
                rates: WheelRates::new(1.0, 2.0),
                obstacles: ObstacleReadings::new(0.5, 0.75),
            }))
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn short_payload_is_garbled_not_fatal() {
        let mut bytes = postcard_cobs::encode_vec(&[1, 2, 3]);
        bytes.push(0);
        bytes.extend(reply_bytes([3.0, 3.0, 1.0, 1.0]));
        let mut buffer = BytesMut::from(&bytes[..]);
        assert!(matches!(
            BoardProtocol.decode(&mut buffer).unwrap(),
            Some(BoardReply::Garbled(_))
        ));
        assert!(matches!(
            BoardProtocol.decode(&mut buffer).unwrap(),
            Some(BoardReply::Telemetry(_))
        ));
    }

    #[test]
    fn stray_delimiters_skipped() {
        let mut bytes = vec![0, 0];
        bytes.extend(reply_bytes([0.0, 0.0, 2.0, 2.0]));
        let mut buffer = BytesMut::from(&bytes[..]);
        assert!(matches!(
            BoardProtocol.decode(&mut buffer).unwrap(),
            Some(BoardReply::Telemetry(_))
        ));
    }

    /// Board end of a duplex pipe. Waits for `requests` request frames, then
    /// answers with `reply`.
    async fn answer_after(
        mut board: tokio::io::DuplexStream,
        requests: usize,
        reply: [f32; 4],
    ) -> tokio::io::DuplexStream {
        let mut seen = 0;
        let mut byte = [0_u8; 1];
        while seen < requests {
            board.read_exact(&mut byte).await.unwrap();
            if byte[0] == 0 {
                seen += 1;
            }
        }
        board.write_all(&reply_bytes(reply)).await.unwrap();
        board
    }

    #[tokio::test]
    async fn exchange_over_stream() {
        let (rover_end, board_end) = tokio::io::duplex(256);
        let mut link = FramedActuatorLink::new(rover_end);
        let board = tokio::spawn(answer_after(board_end, 1, [4.0, 5.0, 0.5, 0.6]));
        let telemetry = link
            .exchange(SetpointFrame::new(4.0, 5.0, LinkMode::Normal))
            .await
            .unwrap();
        assert_eq!(telemetry.rates, WheelRates::new(4.0, 5.0));
        board.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_not_taken_for_next_request() {
        let (rover_end, mut board_end) = tokio::io::duplex(256);
        let mut link = FramedActuatorLink::new(rover_end);

        let first = tokio::time::timeout(
            Duration::from_millis(50),
            link.exchange(SetpointFrame::new(1.0, 1.0, LinkMode::Normal)),
        )
        .await;
        assert!(first.is_err());

        // reply to the abandoned request shows up late
        board_end
            .write_all(&reply_bytes([1.0, 1.0, 9.0, 9.0]))
            .await
            .unwrap();
        let board = tokio::spawn(answer_after(board_end, 2, [2.0, 2.0, 3.0, 3.0]));

        let second = link
            .exchange(SetpointFrame::new(2.0, 2.0, LinkMode::Normal))
            .await
            .unwrap();
        assert_eq!(second.rates, WheelRates::new(2.0, 2.0));
        assert_eq!(second.obstacles, ObstacleReadings::new(3.0, 3.0));
        board.await.unwrap();
    }
}
