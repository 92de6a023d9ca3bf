//! A byte level model of the S25FL064L behind the driver's transport traits.
#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use rand::{rngs::SmallRng, RngCore, SeedableRng};
use s25fl064l::{
    asynchronous::AsyncTransport, blocking::S25FL064L, transport::Transport, CAPACITY, PAGE_SIZE,
    SECTOR_SIZE,
};

pub const UNIQUE_ID: [u8; 8] = [0xC0, 0xFF, 0xEE, 0x00, 0x12, 0x34, 0x56, 0x78];

pub const SFDP_IMAGE: [u8; 24] = [
    b'S', b'F', b'D', b'P', 0x06, 0x01, 0x01, 0xFF, //
    0x00, 0x06, 0x01, 0x10, 0x00, 0x01, 0x00, 0xFF, //
    0x84, 0x00, 0x01, 0x02, 0x40, 0x01, 0x00, 0xFF,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Reset,
    Select,
    Deselect,
    Exchange {
        tx: Vec<u8>,
        rx_len: usize,
        selected: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

pub struct Chip {
    pub memory: Vec<u8>,
    pub sfdp: Vec<u8>,
    pub manufacturer_id: u8,
    pub device_id: u16,
    pub unique_id: [u8; 8],
    pub cr2: u8,
    pub sr2: u8,
    pub write_enable_latch: bool,
    /// The latch never sets, as if the chip were protected
    pub latch_stuck_clear: bool,
    /// Status polls left reporting write in progress
    pub busy_polls: u32,
    /// Status polls reporting write in progress after each program or erase
    pub busy_latency: u32,
    pub power_down: bool,
    pub hardware_resets: u32,
    pub software_resets: u32,
    /// Fail every exchange of a frame starting with this opcode
    pub fail_on_opcode: Option<u8>,
    pub fail_reset: bool,
    pub events: Vec<Event>,
    /// `(address, length)` of each accepted page program
    pub programs: Vec<(u32, usize)>,
    /// Address of each accepted sector erase
    pub erases: Vec<u32>,
    pub chip_erases: u32,
    /// Programs and erases dropped because the chip was still busy
    pub ignored_while_busy: u32,
    pub selected: bool,
    reset_enabled: bool,
    frame: Vec<u8>,
}

impl Chip {
    pub fn new() -> Self {
        let mut sfdp = vec![0xFF; 256];
        sfdp[..SFDP_IMAGE.len()].copy_from_slice(&SFDP_IMAGE);
        Chip {
            memory: vec![0xFF; CAPACITY as usize],
            sfdp,
            manufacturer_id: 0x01,
            device_id: 0x6017,
            unique_id: UNIQUE_ID,
            cr2: 0x00,
            sr2: 0x00,
            write_enable_latch: false,
            latch_stuck_clear: false,
            busy_polls: 0,
            busy_latency: 2,
            power_down: true,
            hardware_resets: 0,
            software_resets: 0,
            fail_on_opcode: None,
            fail_reset: false,
            events: Vec::new(),
            programs: Vec::new(),
            erases: Vec::new(),
            chip_erases: 0,
            ignored_while_busy: 0,
            selected: false,
            reset_enabled: false,
            frame: Vec::new(),
        }
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        core::mem::take(&mut self.events)
    }

    fn status1(&self) -> u8 {
        (self.busy_polls > 0) as u8 | (self.write_enable_latch as u8) << 1
    }

    fn address_len(&self, opcode: u8) -> usize {
        match opcode {
            0x12 | 0x13 | 0x21 => 4,
            _ if self.cr2 & 0x01 != 0 => 4,
            _ => 3,
        }
    }

    fn frame_address(frame: &[u8], len: usize) -> usize {
        frame[1..=len]
            .iter()
            .fold(0usize, |addr, &b| (addr << 8) | b as usize)
    }

    fn clock(&mut self, tx: u8) -> u8 {
        let idx = self.frame.len();
        self.frame.push(tx);
        if idx == 0 || self.power_down {
            return 0;
        }
        let opcode = self.frame[0];
        match opcode {
            0x05 => self.status1(),
            0x07 => self.sr2,
            0x15 => self.cr2,
            0x9F => match idx {
                1 => self.manufacturer_id,
                2 => (self.device_id >> 8) as u8,
                3 => self.device_id as u8,
                _ => 0,
            },
            0x4B if idx >= 5 => self.unique_id.get(idx - 5).copied().unwrap_or(0),
            0x5A if idx >= 5 => {
                let base = Self::frame_address(&self.frame, 3);
                self.sfdp.get(base + idx - 5).copied().unwrap_or(0xFF)
            }
            0x03 | 0x13 => {
                let len = self.address_len(opcode);
                if idx > len {
                    let base = Self::frame_address(&self.frame, len);
                    self.memory[(base + idx - 1 - len) % CAPACITY as usize]
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    fn start_busy(&mut self) {
        self.write_enable_latch = false;
        self.busy_polls = self.busy_latency;
    }

    fn deselect(&mut self) {
        let frame = core::mem::take(&mut self.frame);
        let Some(&opcode) = frame.first() else {
            return;
        };
        if self.power_down {
            if opcode == 0xAB {
                self.power_down = false;
            }
            return;
        }
        if self.busy_polls > 0 && matches!(opcode, 0x02 | 0x12 | 0x20 | 0x21 | 0x60) {
            self.ignored_while_busy += 1;
            self.reset_enabled = false;
            return;
        }
        match opcode {
            0x05 => self.busy_polls = self.busy_polls.saturating_sub(1),
            0x06 => self.write_enable_latch = !self.latch_stuck_clear,
            0x04 => self.write_enable_latch = false,
            0x02 | 0x12 => {
                let len = self.address_len(opcode);
                if self.write_enable_latch && frame.len() > len + 1 {
                    let addr = Self::frame_address(&frame, len);
                    let data = &frame[len + 1..];
                    let page = PAGE_SIZE as usize;
                    let base = addr - addr % page;
                    for (i, b) in data.iter().enumerate() {
                        self.memory[base + (addr % page + i) % page] &= b;
                    }
                    self.programs.push((addr as u32, data.len()));
                    self.start_busy();
                }
            }
            0x20 | 0x21 => {
                let len = self.address_len(opcode);
                if self.write_enable_latch && frame.len() == len + 1 {
                    let addr = Self::frame_address(&frame, len);
                    let sector = SECTOR_SIZE as usize;
                    let base = addr - addr % sector;
                    self.memory[base..base + sector].fill(0xFF);
                    self.erases.push(addr as u32);
                    self.start_busy();
                }
            }
            0x60 => {
                if self.write_enable_latch {
                    self.memory.fill(0xFF);
                    self.chip_erases += 1;
                    self.start_busy();
                }
            }
            0x30 => self.sr2 &= !0x60,
            0xB9 => self.power_down = true,
            0x66 => {
                self.reset_enabled = true;
                return;
            }
            0x99 if self.reset_enabled => {
                self.software_resets += 1;
                self.write_enable_latch = false;
            }
            _ => {}
        }
        self.reset_enabled = false;
    }
}

/// Shared handle on the model, the test keeps one while the driver owns the transport
pub type ChipHandle = Rc<RefCell<Chip>>;

pub struct SimTransport<const MAX: usize = 255> {
    chip: ChipHandle,
}

impl SimTransport {
    pub fn new(chip: &ChipHandle) -> Self {
        Self::with_ceiling(chip)
    }
}

impl<const MAX: usize> SimTransport<MAX> {
    pub fn with_ceiling(chip: &ChipHandle) -> Self {
        Self { chip: chip.clone() }
    }
}

impl<const MAX: usize> Transport for SimTransport<MAX> {
    type Error = SimError;

    const MAX_TRANSFER: usize = MAX;

    fn reset(&mut self) -> Result<(), SimError> {
        let mut chip = self.chip.borrow_mut();
        chip.events.push(Event::Reset);
        if chip.fail_reset {
            return Err(SimError);
        }
        chip.hardware_resets += 1;
        chip.write_enable_latch = false;
        chip.busy_polls = 0;
        Ok(())
    }

    fn chip_select(&mut self, selected: bool) -> Result<(), SimError> {
        let mut chip = self.chip.borrow_mut();
        if selected {
            chip.events.push(Event::Select);
            chip.frame.clear();
        } else {
            chip.events.push(Event::Deselect);
            chip.deselect();
        }
        chip.selected = selected;
        Ok(())
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), SimError> {
        let mut chip = self.chip.borrow_mut();
        let selected = chip.selected;
        chip.events.push(Event::Exchange {
            tx: tx.to_vec(),
            rx_len: rx.len(),
            selected,
        });
        let clocks = tx.len().max(rx.len());
        assert!(clocks <= MAX, "exchange of {clocks} bytes exceeds {MAX}");

        let opcode = chip.frame.first().or(tx.first()).copied();
        if opcode.is_some() && opcode == chip.fail_on_opcode {
            return Err(SimError);
        }
        if !selected {
            return Ok(());
        }
        for i in 0..clocks {
            let out = chip.clock(tx.get(i).copied().unwrap_or(0));
            if let Some(r) = rx.get_mut(i) {
                *r = out;
            }
        }
        Ok(())
    }
}

/// Same model behind the async transport
pub struct AsyncSimTransport(pub SimTransport);

impl AsyncTransport for AsyncSimTransport {
    type Error = SimError;

    const MAX_TRANSFER: usize = 255;

    async fn reset(&mut self) -> Result<(), SimError> {
        Transport::reset(&mut self.0)
    }

    fn chip_select(&mut self, selected: bool) -> Result<(), SimError> {
        Transport::chip_select(&mut self.0, selected)
    }

    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), SimError> {
        Transport::exchange(&mut self.0, tx, rx)
    }
}

pub fn chip() -> ChipHandle {
    Rc::new(RefCell::new(Chip::new()))
}

/// A driver that went through `init` successfully, with the init traffic cleared
pub fn initialized() -> (S25FL064L<SimTransport>, ChipHandle) {
    let chip = chip();
    let mut flash = S25FL064L::new(SimTransport::new(&chip));
    flash.init().expect("init");
    chip.borrow_mut().take_events();
    (flash, chip)
}

/// Every exchange happened with chip-select asserted, and selects and deselects alternate
pub fn assert_framed(events: &[Event]) {
    let mut selected = false;
    for event in events {
        match event {
            Event::Select => {
                assert!(!selected, "nested chip select");
                selected = true;
            }
            Event::Deselect => {
                assert!(selected, "deselect without select");
                selected = false;
            }
            Event::Exchange { selected: s, .. } => assert!(*s, "exchange outside of a frame"),
            Event::Reset => assert!(!selected, "reset inside a frame"),
        }
    }
    assert!(!selected, "frame left open");
}

/// Split an event log into frames, each the list of `(tx, rx_len)` exchanged under one select
pub fn frames(events: &[Event]) -> Vec<Vec<(Vec<u8>, usize)>> {
    let mut frames = Vec::new();
    let mut current = Vec::new();
    for event in events {
        match event {
            Event::Select => current = Vec::new(),
            Event::Deselect => frames.push(core::mem::take(&mut current)),
            Event::Exchange { tx, rx_len, .. } => current.push((tx.clone(), *rx_len)),
            Event::Reset => {}
        }
    }
    frames
}

/// Opcode of each frame
pub fn opcodes(events: &[Event]) -> Vec<u8> {
    frames(events)
        .iter()
        .filter_map(|frame| frame.first().and_then(|(tx, _)| tx.first().copied()))
        .collect()
}

/// Deterministic pseudo random bytes
pub fn pattern(seed: u32, len: usize) -> Vec<u8> {
    let mut rng = SmallRng::seed_from_u64(seed.into());
    let mut bytes = vec![0; len];
    rng.fill_bytes(&mut bytes);
    bytes
}
