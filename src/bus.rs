use rand::{rngs::StdRng, RngCore, SeedableRng};
use serde::Serialize;
use tracing::trace;

use crate::isa::DATA_MEM_SIZE;

/*
  Data memory map (addresses are masked to 8 bits)
  ______________________
 | 255  controller      |  read: observer poll
 | 254  RNG             |  read: random byte
 |_247-253_RAM__________|
 | 246  clear buffer    |  write: zero screen, commit
 | 245  buffer screen   |  write: commit
 | 244  load pixel      |  read: bit at cursor
 | 243  clear pixel     |  write: clear bit at cursor
 | 242  draw pixel      |  write: set bit at cursor
 | 241  pixel Y         |  write: cursor y
 | 240  pixel X         |  write: cursor x
 |______________________|
 | 0-239  RAM           |
 |______________________|
*/

pub const PIXEL_X: u8 = 240;
pub const PIXEL_Y: u8 = 241;
pub const DRAW_PIXEL: u8 = 242;
pub const CLEAR_PIXEL: u8 = 243;
pub const LOAD_PIXEL: u8 = 244;
pub const BUFFER_SCREEN: u8 = 245;
pub const CLEAR_SCREEN_BUFFER: u8 = 246;
pub const RNG: u8 = 254;
pub const CONTROLLER: u8 = 255;

/// Cursor registers keep 5 bits.
const CURSOR_MASK: u8 = 0x1F;

/// Off-screen pixel grid. Row-major, `rows[y][x]` is 0 or 1.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct ScreenBuffer {
    width: usize,
    height: usize,
    rows: Vec<Vec<u8>>,
}

impl ScreenBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        ScreenBuffer {
            width,
            height,
            rows: vec![vec![0; width]; height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel at `(x, y)`. Out of bounds reads are off.
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.rows
            .get(y)
            .and_then(|row| row.get(x))
            .is_some_and(|bit| *bit != 0)
    }

    /// Set or clear `(x, y)`. Out of bounds writes are dropped.
    pub fn set(&mut self, x: usize, y: usize, on: bool) {
        if let Some(bit) = self.rows.get_mut(y).and_then(|row| row.get_mut(x)) {
            *bit = on as u8;
        }
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn clear(&mut self) {
        for row in &mut self.rows {
            row.fill(0);
        }
    }

    pub fn lit(&self) -> usize {
        self.rows.iter().flatten().filter(|bit| **bit != 0).count()
    }
}

/// External side of the memory-mapped devices. Called synchronously from inside a step.
pub trait Devices {
    /// A program wrote to buffer-screen or clear-screen-buffer.
    fn on_buffer_commit(&mut self, _screen: &ScreenBuffer) {}

    /// A program read the controller address.
    fn poll_controller(&mut self) -> u8 {
        0
    }
}

/// No observer attached. Commits are dropped and the controller reads 0.
#[derive(Clone, Copy, Default, Debug)]
pub struct Detached;

impl Devices for Detached {}

/// Data memory with the device registers mapped over it.
pub struct Bus {
    ram: [u8; DATA_MEM_SIZE],
    screen: ScreenBuffer,
    cursor_x: u8,
    cursor_y: u8,
    rng: StdRng,
    seed: Option<u64>,
}

impl Bus {
    pub fn new(width: usize, height: usize, seed: Option<u64>) -> Self {
        Bus {
            ram: [0; DATA_MEM_SIZE],
            screen: ScreenBuffer::new(width, height),
            cursor_x: 0,
            cursor_y: 0,
            rng: Self::make_rng(seed),
            seed,
        }
    }

    fn make_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Zero RAM, screen and cursor. A seeded RNG restarts its sequence.
    pub fn reset(&mut self) {
        self.ram = [0; DATA_MEM_SIZE];
        self.screen.clear();
        self.cursor_x = 0;
        self.cursor_y = 0;
        if self.seed.is_some() {
            self.rng = Self::make_rng(self.seed);
        }
    }

    pub fn screen(&self) -> &ScreenBuffer {
        &self.screen
    }

    pub fn ram(&self) -> &[u8; DATA_MEM_SIZE] {
        &self.ram
    }

    fn cursor_pixel(&self) -> (usize, usize) {
        (self.cursor_x as usize, self.cursor_y as usize)
    }

    pub fn read(&mut self, addr: u8, devices: &mut impl Devices) -> u8 {
        match addr {
            LOAD_PIXEL => {
                let (x, y) = self.cursor_pixel();
                self.screen.get(x, y) as u8
            }
            RNG => (self.rng.next_u32() & 0xFF) as u8,
            CONTROLLER => devices.poll_controller(),
            PIXEL_X..=CLEAR_SCREEN_BUFFER => 0,
            _ => self.ram[addr as usize],
        }
    }

    pub fn write(&mut self, addr: u8, value: u8, devices: &mut impl Devices) {
        match addr {
            PIXEL_X => self.cursor_x = value & CURSOR_MASK,
            PIXEL_Y => self.cursor_y = value & CURSOR_MASK,
            DRAW_PIXEL | CLEAR_PIXEL => {
                let (x, y) = self.cursor_pixel();
                self.screen.set(x, y, addr == DRAW_PIXEL);
            }
            BUFFER_SCREEN => {
                trace!(lit = self.screen.lit(), "screen commit");
                devices.on_buffer_commit(&self.screen);
            }
            CLEAR_SCREEN_BUFFER => {
                self.screen.clear();
                devices.on_buffer_commit(&self.screen);
            }
            LOAD_PIXEL | RNG | CONTROLLER => {}
            _ => self.ram[addr as usize] = value,
        }
    }
}
