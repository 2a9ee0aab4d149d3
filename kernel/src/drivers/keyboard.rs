//! PS/2 keyboard driver (§4.J).
//!
//! The ISR reads one scancode byte from the controller data port (0x60),
//! remembers a two-byte extended (`0xe0`) prefix across interrupts, and
//! routes break codes to modifier-state updates. Make codes index a
//! `(unshifted, shifted)` table; the shifted column is chosen by
//! `shift ^ caps_lock` for letters and by `shift` alone for everything else.
//! The resulting byte, if any, is pushed into the blocking input ring
//! ([`crate::sync::IoQueue`]).

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::sync::IoQueue;

const KBD_DATA_PORT: u16 = 0x60;

const L_SHIFT_MAKECODE: u8 = 0x2a;
const R_SHIFT_MAKECODE: u8 = 0x36;
const L_ALT_MAKECODE: u8 = 0x38;
const L_CTRL_MAKECODE: u8 = 0x1d;
const CAPS_LOCK_MAKECODE: u8 = 0x3a;
// Extended (0xe0-prefixed) right ctrl/alt use the same low byte as their
// non-extended counterparts once the prefix is folded in by `ExtendedKey`.
const R_CTRL_MAKECODE_EXT: u16 = 0xe000 | L_CTRL_MAKECODE as u16;
const R_ALT_MAKECODE_EXT: u16 = 0xe000 | L_ALT_MAKECODE as u16;

const ESC: u8 = 0x1b;
const BACKSPACE: u8 = 0x08;
const TAB: u8 = 0x09;
const ENTER: u8 = b'\r';

/// `(unshifted, shifted)` ASCII pairs, indexed by the low byte of the make
/// code. Entries that map to a modifier key (ctrl/shift/alt/caps lock) are
/// `(0, 0)`; a zero result means "no printable character, check modifiers."
const KEYMAP: [(u8, u8); 0x3b] = [
    (0, 0),
    (ESC, ESC),
    (b'1', b'!'),
    (b'2', b'@'),
    (b'3', b'#'),
    (b'4', b'$'),
    (b'5', b'%'),
    (b'6', b'^'),
    (b'7', b'&'),
    (b'8', b'*'),
    (b'9', b'('),
    (b'0', b')'),
    (b'-', b'_'),
    (b'=', b'+'),
    (BACKSPACE, BACKSPACE),
    (TAB, TAB),
    (b'q', b'Q'),
    (b'w', b'W'),
    (b'e', b'E'),
    (b'r', b'R'),
    (b't', b'T'),
    (b'y', b'Y'),
    (b'u', b'U'),
    (b'i', b'I'),
    (b'o', b'O'),
    (b'p', b'P'),
    (b'[', b'{'),
    (b']', b'}'),
    (ENTER, ENTER),
    (0, 0), // left ctrl
    (b'a', b'A'),
    (b's', b'S'),
    (b'd', b'D'),
    (b'f', b'F'),
    (b'g', b'G'),
    (b'h', b'H'),
    (b'j', b'J'),
    (b'k', b'K'),
    (b'l', b'L'),
    (b';', b':'),
    (b'\'', b'"'),
    (b'`', b'~'),
    (0, 0), // left shift
    (b'\\', b'|'),
    (b'z', b'Z'),
    (b'x', b'X'),
    (b'c', b'C'),
    (b'v', b'V'),
    (b'b', b'B'),
    (b'n', b'N'),
    (b'm', b'M'),
    (b',', b'<'),
    (b'.', b'>'),
    (b'/', b'?'),
    (0, 0), // right shift
    (b'*', b'*'),
    (0, 0), // left alt
    (b' ', b' '),
    (0, 0), // caps lock
];

/// Scancodes in this table have a shifted form that does not follow the
/// letter-keys caps-lock-interaction rule: shift alone picks the shifted
/// column regardless of caps lock.
fn is_punctuation_key(code: u8) -> bool {
    code < 0x0e
        || matches!(
            code,
            0x29 | 0x1a | 0x1b | 0x2b | 0x27 | 0x28 | 0x33 | 0x34 | 0x35
        )
}

struct KeyboardState {
    ctrl: bool,
    shift: bool,
    alt: bool,
    caps_lock: bool,
    extended: bool,
}

impl KeyboardState {
    const fn new() -> Self {
        Self {
            ctrl: false,
            shift: false,
            alt: false,
            caps_lock: false,
            extended: false,
        }
    }
}

static STATE: Mutex<KeyboardState> = Mutex::new(KeyboardState::new());
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Ring buffer capacity (one slot reserved to disambiguate full/empty).
const KBD_QUEUE_SIZE: usize = 64;

/// Not wrapped in a spinlock: [`IoQueue`] already serializes itself via
/// `without_interrupts`, and taking a spinlock here would stay held across
/// the context switch inside a blocking `getchar`/`putchar`, deadlocking
/// the next producer IRQ.
static mut KBD_QUEUE: IoQueue<KBD_QUEUE_SIZE> = IoQueue::new();

#[allow(static_mut_refs)]
fn kbd_queue() -> &'static mut IoQueue<KBD_QUEUE_SIZE> {
    unsafe { &mut *core::ptr::addr_of_mut!(KBD_QUEUE) }
}

/// Current modifier bitmask, exposed for callers that need it (e.g. the
/// shell's Ctrl-C handling).
pub const MOD_CTRL: u8 = 0x01;
pub const MOD_SHIFT: u8 = 0x02;
pub const MOD_ALT: u8 = 0x04;
pub const MOD_CAPS_LOCK: u8 = 0x08;

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

pub fn get_modifiers() -> u8 {
    let s = STATE.lock();
    (s.ctrl as u8 * MOD_CTRL)
        | (s.shift as u8 * MOD_SHIFT)
        | (s.alt as u8 * MOD_ALT)
        | (s.caps_lock as u8 * MOD_CAPS_LOCK)
}

pub fn init() {
    INITIALIZED.store(true, Ordering::Release);
}

/// Handle a raw scancode read from IRQ1. Must not block: this runs in
/// interrupt context, so queue overflow drops the byte rather than waiting.
pub fn handle_scancode(raw: u8) {
    let mut state = STATE.lock();

    if raw == 0xe0 {
        state.extended = true;
        return;
    }
    let code: u16 = if state.extended {
        state.extended = false;
        0xe000 | raw as u16
    } else {
        raw as u16
    };

    let break_code = code & 0x80 != 0;
    let makecode = code & !0x80;

    if break_code {
        if makecode as u8 == L_CTRL_MAKECODE || makecode == R_CTRL_MAKECODE_EXT {
            state.ctrl = false;
        }
        if makecode as u8 == L_SHIFT_MAKECODE || makecode as u8 == R_SHIFT_MAKECODE {
            state.shift = false;
        }
        if makecode as u8 == L_ALT_MAKECODE || makecode == R_ALT_MAKECODE_EXT {
            state.alt = false;
        }
        return;
    }

    if makecode >= 0x3b {
        return;
    }
    let index = makecode as u8;

    let shift_down = state.shift;
    let caps_down = state.caps_lock;
    let shift = if is_punctuation_key(index) {
        shift_down
    } else {
        shift_down ^ caps_down
    };

    let (unshifted, shifted) = KEYMAP[index as usize];
    let ch = if shift { shifted } else { unshifted };

    if ch != 0 {
        kbd_queue().putchar_from_irq(ch);
        return;
    }

    match index {
        L_CTRL_MAKECODE => state.ctrl = true,
        L_SHIFT_MAKECODE | R_SHIFT_MAKECODE => state.shift = true,
        L_ALT_MAKECODE => state.alt = true,
        CAPS_LOCK_MAKECODE => state.caps_lock = !state.caps_lock,
        _ => {}
    }
    if makecode == R_CTRL_MAKECODE_EXT {
        state.ctrl = true;
    }
    if makecode == R_ALT_MAKECODE_EXT {
        state.alt = true;
    }
}

/// Read the next keyboard data port byte and decode it. Called directly by
/// the IRQ1 handler.
pub fn on_irq() {
    let scancode = unsafe { crate::arch::x86_64::inb(KBD_DATA_PORT) };
    handle_scancode(scancode);
}

/// Block the calling task until a decoded key byte is available. This is
/// the tty reader's sole entry point (typically the shell).
///
/// # Safety
/// Must be called from thread context, never from an interrupt handler.
pub unsafe fn read_key_blocking() -> u8 {
    unsafe { kbd_queue().getchar() }
}

/// Non-blocking read, for callers that must not suspend.
pub fn read_key() -> Option<u8> {
    kbd_queue().try_getchar()
}
