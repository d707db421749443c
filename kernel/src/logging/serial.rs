// kernel/src/logging/serial.rs
//
// COM1 (0x3F8) への最小限のシリアル出力。
// - init(): 115200bps, 8N1 に初期化
// - write_parts_line(): prefix + 部分文字列 + CRLF を送信
// - emergency_write_str(): lock 無し・待ち上限付き（例外ハンドラ / fail-stop 用）。
//   QEMU debugcon(0xE9) にも同じバイトを出す。

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;
use x86_64::instructions::port::Port;

const COM1: u16 = 0x3F8;

static SERIAL_INITIALIZED: AtomicBool = AtomicBool::new(false);
static SERIAL_LOCK: Mutex<()> = Mutex::new(());

pub fn init() {
    if SERIAL_INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }

    unsafe {
        let mut port_int_en = Port::<u8>::new(COM1 + 1);
        let mut port_line_ctrl = Port::<u8>::new(COM1 + 3);
        let mut port_div_low = Port::<u8>::new(COM1);
        let mut port_div_high = Port::<u8>::new(COM1 + 1);
        let mut port_fifo_ctrl = Port::<u8>::new(COM1 + 2);
        let mut port_modem_ctrl = Port::<u8>::new(COM1 + 4);

        port_int_en.write(0x00);

        port_line_ctrl.write(0x80);
        port_div_low.write(0x01);
        port_div_high.write(0x00);

        port_line_ctrl.write(0x03);
        port_fifo_ctrl.write(0xC7);
        port_modem_ctrl.write(0x0B);
    }
}

fn write_byte(byte: u8) {
    unsafe {
        let mut line_status = Port::<u8>::new(COM1 + 5);
        let mut data = Port::<u8>::new(COM1);

        while (line_status.read() & 0x20) == 0 {}

        data.write(byte);
    }
}

fn write_str(s: &str) {
    for b in s.bytes() {
        write_byte(b);
    }
}

pub fn write_parts_line(prefix: &str, parts: &[&str]) {
    if !SERIAL_INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    let Some(_guard) = SERIAL_LOCK.try_lock() else {
        return;
    };
    write_str(prefix);
    for p in parts {
        write_str(p);
    }
    write_str("\r\n");
}

fn emergency_write_byte(b: u8) {
    unsafe {
        // QEMU debugcon
        Port::<u8>::new(0xE9).write(b);

        let mut lsr = Port::<u8>::new(COM1 + 5);
        let mut data = Port::<u8>::new(COM1);
        for _ in 0..10_000 {
            if (lsr.read() & 0x20) != 0 {
                break;
            }
        }
        data.write(b);
    }
}

pub fn emergency_write_str(s: &str) {
    for b in s.bytes() {
        emergency_write_byte(b);
    }
}
