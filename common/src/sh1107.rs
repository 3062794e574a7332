//! SH1107 128x128 monochrome OLED over blocking I2C, drawn through
//! embedded-graphics into a page-ordered frame buffer.

use embedded_graphics::{
    mono_font::{ascii::FONT_5X8, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use embedded_hal::i2c::I2c;

use crate::{
    display::{screen_lines, DisplaySnapshot},
    hal::{Display, DisplayError},
};

pub const DEFAULT_ADDRESS: u8 = 0x3C;

const WIDTH: usize = 128;
const HEIGHT: usize = 128;
const PAGES: usize = HEIGHT / 8;
const LINE_HEIGHT: i32 = 8;

const CONTROL_COMMAND: u8 = 0x00;
const CONTROL_DATA: u8 = 0x40;

mod cmd {
    pub const DISPLAY_OFF: u8 = 0xAE;
    pub const DISPLAY_ON: u8 = 0xAF;
    pub const SET_CLOCK_DIV: u8 = 0xD5;
    pub const PAGE_ADDRESSING: u8 = 0x20;
    pub const SET_CONTRAST: u8 = 0x81;
    pub const SET_DC_DC: u8 = 0xAD;
    pub const SEG_NORMAL: u8 = 0xA0;
    pub const COM_SCAN_INC: u8 = 0xC0;
    pub const SET_START_LINE: u8 = 0xDC;
    pub const SET_DISPLAY_OFFSET: u8 = 0xD3;
    pub const SET_PRECHARGE: u8 = 0xD9;
    pub const SET_VCOM_DESELECT: u8 = 0xDB;
    pub const SET_MUX_RATIO: u8 = 0xA8;
    pub const RESUME_FROM_RAM: u8 = 0xA4;
    pub const SET_NORMAL: u8 = 0xA6;
    pub const SET_PAGE_ADDR: u8 = 0xB0;
    pub const SET_LOW_COLUMN: u8 = 0x00;
    pub const SET_HIGH_COLUMN: u8 = 0x10;
}

const INIT_SEQUENCE: [u8; 23] = [
    CONTROL_COMMAND,
    cmd::DISPLAY_OFF,
    cmd::SET_CLOCK_DIV,
    0x51,
    cmd::PAGE_ADDRESSING,
    cmd::SET_CONTRAST,
    0x4F,
    cmd::SET_DC_DC,
    0x8A,
    cmd::SEG_NORMAL,
    cmd::COM_SCAN_INC,
    cmd::SET_START_LINE,
    0x00,
    cmd::SET_DISPLAY_OFFSET,
    0x00,
    cmd::SET_PRECHARGE,
    0x22,
    cmd::SET_VCOM_DESELECT,
    0x35,
    cmd::SET_MUX_RATIO,
    0x7F,
    cmd::RESUME_FROM_RAM,
    cmd::SET_NORMAL,
];

/// One bit per pixel; byte `pages[p][x]` holds rows `8p..8p+8` of column `x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pages: [[u8; WIDTH]; PAGES],
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self {
            pages: [[0; WIDTH]; PAGES],
        }
    }
}

impl FrameBuffer {
    pub fn clear_all(&mut self) {
        for page in self.pages.iter_mut() {
            page.fill(0);
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> bool {
        x < WIDTH && y < HEIGHT && self.pages[y / 8][x] & (1 << (y % 8)) != 0
    }

    pub fn page(&self, page: usize) -> &[u8; WIDTH] {
        &self.pages[page]
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (usize::try_from(point.x), usize::try_from(point.y)) else {
                continue;
            };
            if x >= WIDTH || y >= HEIGHT {
                continue;
            }
            let mask = 1 << (y % 8);
            if color.is_on() {
                self.pages[y / 8][x] |= mask;
            } else {
                self.pages[y / 8][x] &= !mask;
            }
        }
        Ok(())
    }
}

/// Text-mode panel: each render lays out [`screen_lines`] and pushes the
/// whole frame, skipping the bus when the text has not changed.
pub struct Sh1107<I2C> {
    i2c: I2C,
    address: u8,
    frame: FrameBuffer,
    shown: Option<Vec<String>>,
}

impl<I2C: I2c> Sh1107<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            frame: FrameBuffer::default(),
            shown: None,
        }
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    fn draw_lines(&mut self, lines: &[String]) {
        self.frame.clear_all();
        let style = MonoTextStyle::new(&FONT_5X8, BinaryColor::On);
        for (row, line) in lines.iter().enumerate() {
            let Ok(row) = i32::try_from(row) else {
                break;
            };
            let origin = Point::new(0, row * LINE_HEIGHT);
            let _ = Text::with_baseline(line, origin, style, Baseline::Top).draw(&mut self.frame);
        }
    }

    fn flush(&mut self) -> Result<(), I2C::Error> {
        let mut data = [0_u8; WIDTH + 1];
        data[0] = CONTROL_DATA;
        for page in 0..PAGES {
            self.i2c.write(
                self.address,
                &[
                    CONTROL_COMMAND,
                    cmd::SET_PAGE_ADDR | page as u8,
                    cmd::SET_LOW_COLUMN,
                    cmd::SET_HIGH_COLUMN,
                ],
            )?;
            data[1..].copy_from_slice(self.frame.page(page));
            self.i2c.write(self.address, &data)?;
        }
        Ok(())
    }
}

impl<I2C: I2c> Display for Sh1107<I2C> {
    fn init(&mut self) -> Result<(), DisplayError> {
        self.i2c
            .write(self.address, &INIT_SEQUENCE)
            .map_err(|err| DisplayError::Init(format!("{err:?}")))?;
        self.frame.clear_all();
        self.flush()
            .map_err(|err| DisplayError::Init(format!("{err:?}")))?;
        self.i2c
            .write(self.address, &[CONTROL_COMMAND, cmd::DISPLAY_ON])
            .map_err(|err| DisplayError::Init(format!("{err:?}")))?;
        self.shown = None;
        Ok(())
    }

    fn render(&mut self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError> {
        let lines = screen_lines(snapshot);
        if self.shown.as_ref() == Some(&lines) {
            return Ok(());
        }
        self.draw_lines(&lines);
        self.flush()
            .map_err(|err| DisplayError::Write(format!("{err:?}")))?;
        self.shown = Some(lines);
        Ok(())
    }
}
