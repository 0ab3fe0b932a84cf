//! Links over local serial ports via `tokio-serial`

use std::{ io, time::Duration };
use async_trait::async_trait;
use tokio_serial::{ ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream };
use tracing::debug;

use crate::{
    lines::LineReader,
    link::{ AddressSource, LineRead, LinkError, LinkOpener, SerialLink },
};

/// Opens `address` as an 8N1 serial stream without flow control
///
/// Creating I/O handles this way is only a convenience. Any `AsyncRead + AsyncWrite` stream, such as
/// a TCP serial bridge, works for the supply as well.
pub fn open_stream(address: &str, baud_rate: u32, timeout: Duration) -> Result<SerialStream, LinkError>
{
    tokio_serial::new(address, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout)
        .open_native_async()
        .map_err(|err| LinkError::Open {
            address: address.to_string(),
            source: err.into(),
        })
}

/// A link to the device under test over a local serial port
pub struct SerialPortLink
{
    address: String,
    reader: LineReader<SerialStream>,
}

impl SerialPortLink
{
    pub fn address(&self) -> &str
    {
        &self.address
    }
}

#[async_trait]
impl SerialLink for SerialPortLink
{
    async fn read_line(&mut self, timeout: Duration) -> Result<LineRead, LinkError>
    {
        // `next_line` is cancel safe so a partial line survives the timeout
        match tokio::time::timeout(timeout, self.reader.next_line()).await {
            Ok(Ok(line)) => Ok(LineRead::Line(line)),
            Ok(Err(err)) => Err(LinkError::Disconnected(err)),
            Err(_) => Ok(LineRead::TimedOut),
        }
    }

    async fn discard_input(&mut self) -> Result<(), LinkError>
    {
        self.reader.discard();
        self.reader
            .get_mut()
            .clear(ClearBuffer::Input)
            .map_err(|err| LinkError::Disconnected(err.into()))
    }

    async fn close(self)
    {
        debug!(address = %self.address, "closing serial connection");
        drop(self.reader);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

#[async_trait]
impl LinkOpener for SerialPortOpener
{
    type Link = SerialPortLink;

    async fn open(&self, address: &str, baud_rate: u32, timeout: Duration) -> Result<SerialPortLink, LinkError>
    {
        let stream = open_stream(address, baud_rate, timeout)?;

        Ok(SerialPortLink {
            address: address.to_string(),
            reader: LineReader::new(stream),
        })
    }
}

/// The serial ports known to the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl AddressSource for SystemPorts
{
    fn list_available(&self) -> io::Result<Vec<String>>
    {
        let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
        Ok(ports.into_iter().map(|port| port.port_name).collect())
    }
}
