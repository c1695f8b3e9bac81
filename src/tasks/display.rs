// PingZee - OLED Display Task
//
// Waits for the SPI task, registers the SSD1306 and initialises it, then
// serves page/column writes.

use crate::config::{OLED_PAGES, OLED_QUEUE_LEN, OLED_RESULT_LEN, OLED_WIDTH, PIN_OLED_CS};
use crate::drivers::ssd1306::Ssd1306;
use crate::error::TransportError;
use crate::tasks::spi::SpiEndpoint;
use crate::tasks::worker::{Done, Endpoint, Handler, Message};

pub type DisplayEndpoint = Endpoint<DisplayMsg, OLED_QUEUE_LEN, OLED_RESULT_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCmd {
    Init,
    /// Raw bytes at (page, column); zero bytes blank a line.
    Clean,
    /// ASCII text at (page, column).
    Show,
}

#[derive(Debug, Clone, Copy)]
pub struct DisplayMsg {
    pub cmd: DisplayCmd,
    pub page: u8,
    pub column: u8,
    pub len: usize,
    pub data: [u8; OLED_WIDTH],
    pub status: Result<(), TransportError>,
    pub done: Done<DisplayMsg>,
}

impl Message for DisplayMsg {
    fn done(&self) -> Done<Self> {
        self.done
    }
}

impl DisplayMsg {
    fn new(cmd: DisplayCmd, page: u8, column: u8, bytes: &[u8]) -> Self {
        let len = bytes.len().min(OLED_WIDTH);
        let mut data = [0u8; OLED_WIDTH];
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            cmd,
            page,
            column,
            len,
            data,
            status: Ok(()),
            done: Done::Reply,
        }
    }

    pub fn init() -> Self {
        Self::new(DisplayCmd::Init, 0, 0, &[])
    }

    /// Blank `len` columns of `page` starting at `column`.
    pub fn clean(page: u8, column: u8, len: usize) -> Self {
        Self::new(DisplayCmd::Clean, page, column, &[0u8; OLED_WIDTH][..len.min(OLED_WIDTH)])
    }

    pub fn raw(page: u8, column: u8, bytes: &[u8]) -> Self {
        Self::new(DisplayCmd::Clean, page, column, bytes)
    }

    /// Text longer than one line is cut at the message buffer.
    pub fn show(page: u8, column: u8, text: &str) -> Self {
        Self::new(DisplayCmd::Show, page, column, text.as_bytes())
    }

    pub fn with_done(mut self, done: Done<DisplayMsg>) -> Self {
        self.done = done;
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len.min(OLED_WIDTH)]
    }
}

pub struct DisplayWorker {
    panel: Ssd1306,
    initialised: bool,
}

impl DisplayWorker {
    pub fn new(spi: &'static SpiEndpoint) -> Self {
        Self {
            panel: Ssd1306::new(spi),
            initialised: false,
        }
    }

    fn bring_up(&mut self) -> Result<(), TransportError> {
        self.panel.attach(PIN_OLED_CS)?;
        self.panel.init()?;
        self.panel.clear()?;
        self.initialised = true;
        Ok(())
    }
}

impl Handler for DisplayWorker {
    type Msg = DisplayMsg;

    fn init(&mut self) -> anyhow::Result<()> {
        self.bring_up()?;
        Ok(())
    }

    fn handle(&mut self, msg: &mut DisplayMsg) {
        if msg.page >= OLED_PAGES {
            msg.status = Err(TransportError::NoSuchPage(msg.page));
            return;
        }
        msg.status = match msg.cmd {
            DisplayCmd::Init if self.initialised => self.panel.init(),
            DisplayCmd::Init => self.bring_up(),
            DisplayCmd::Clean => self.panel.write_raw(msg.page, msg.column, msg.payload()),
            DisplayCmd::Show => {
                let text = String::from_utf8_lossy(msg.payload());
                self.panel.write_text(msg.page, msg.column, &text).map(|_| ())
            }
        };
        if let Err(e) = msg.status {
            log::warn!("oled: {}", e);
        }
    }
}
