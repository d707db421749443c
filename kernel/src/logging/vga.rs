// src/logging/vga.rs
//
// VGA テキストモード(0xb8000)への最小限出力。
// - init(): Writer を初期化
// - write_parts_line(): prefix + 部分文字列を 1 行として出す（[ERROR] は赤）
//
// 目的:
// - まずは「画面に出る」ことを最優先にした簡易実装。
// - 0xb8000 は low 側 identity 領域にあるので、タスクの CR3 中でも（splice 済みなら）書ける。

use core::fmt::{self, Write};
use spin::Mutex;
use volatile::Volatile;

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

#[derive(Clone, Copy)]
#[repr(u8)]
enum Color {
    Black = 0x0,
    LightRed = 0xc,
    LightGray = 0x7,
}

const fn color_code(fg: Color, bg: Color) -> u8 {
    (fg as u8) | ((bg as u8) << 4)
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ScreenChar {
    ascii_character: u8,
    color_code: u8,
}

#[repr(transparent)]
struct Buffer {
    chars: [[Volatile<ScreenChar>; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

struct Writer {
    col: usize,
    color_code: u8,
    buffer: &'static mut Buffer,
}

impl Writer {
    fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            byte => {
                if self.col >= BUFFER_WIDTH {
                    self.new_line();
                }
                let row = BUFFER_HEIGHT - 1;
                let col = self.col;
                self.buffer.chars[row][col].write(ScreenChar {
                    ascii_character: byte,
                    color_code: self.color_code,
                });
                self.col += 1;
            }
        }
    }

    fn new_line(&mut self) {
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                let ch = self.buffer.chars[row][col].read();
                self.buffer.chars[row - 1][col].write(ch);
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
        self.col = 0;
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        for col in 0..BUFFER_WIDTH {
            self.buffer.chars[row][col].write(blank);
        }
    }
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            // 表示できないバイトは '?' にする
            let b = if (0x20..0x7f).contains(&b) || b == b'\n' { b } else { b'?' };
            self.write_byte(b);
        }
        Ok(())
    }
}

static WRITER: Mutex<Option<Writer>> = Mutex::new(None);

pub fn init() {
    let writer = Writer {
        col: 0,
        color_code: color_code(Color::LightGray, Color::Black),
        // Safety: 0xb8000 は VGA テキストバッファで、bootloader が identity map している
        buffer: unsafe { &mut *(0xb8000 as *mut Buffer) },
    };
    *WRITER.lock() = Some(writer);
}

pub fn write_parts_line(prefix: &str, parts: &[&str]) {
    // 割り込み中に lock 済みだったら諦める（デッドロックより欠落を選ぶ）
    let Some(mut guard) = WRITER.try_lock() else {
        return;
    };
    if let Some(ref mut w) = *guard {
        let normal = w.color_code;
        if prefix.starts_with("[ERROR]") {
            w.color_code = color_code(Color::LightRed, Color::Black);
        }
        let _ = w.write_str(prefix);
        for p in parts {
            let _ = w.write_str(p);
        }
        let _ = w.write_str("\n");
        w.color_code = normal;
    }
}
