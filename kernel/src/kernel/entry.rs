// kernel/src/kernel/entry.rs
//
// memcore: kernel entry glue
//
// 役割:
// - bootloader から BootInfo を受け取り、MemoryManager を組み立てる。
// - デモタスクを 1 つ build して CR3 を切り替え、実機で user 空間が引けることを確かめる。
//
// やること:
// - logging / IDT の初期化
// - memory map → MemoryRegion へ変換して frame pool の置き場所を選ぶ
// - feature に応じて階層ダンプと fault injection
//
// やらないこと:
// - タスクの実行（ring3 への遷移やスケジューリング）

use bootloader::bootinfo::MemoryRegionType as BootRegionType;
use bootloader::BootInfo;

use crate::arch::cpu::{self, X86ControlRegisters};
use crate::arch::{self, interrupts};
use crate::logging;
use crate::mem::addr::{PhysAddr, VirtAddr};
use crate::mem::address_space::{Task, TaskImage};
use crate::mem::layout::USER_TEXT_START;
use crate::mem::phys::PhysWindow;
use crate::mm::{FramePool, PoolConfig};
use crate::types::{MemoryRegion, MemoryRegionType, PAGE_SIZE};

use super::{demo, MemoryManager};

/// デモタスクの中身（jmp $）
const DEMO_TEXT: [u8; 2] = [0xeb, 0xfe];

pub fn start(boot_info: &'static BootInfo) -> ! {
    logging::init();
    logging::info("memcore: kernel start");
    interrupts::init();

    // Safety: bootloader(map_physical_memory) が物理メモリ全域をこの offset に map している
    let window = unsafe { PhysWindow::new(boot_info.physical_memory_offset) };

    let regions = boot_info.memory_map.iter().enumerate().map(|(i, r)| MemoryRegion {
        index: i,
        start_phys: r.range.start_frame_number * PAGE_SIZE,
        end_phys: r.range.end_frame_number * PAGE_SIZE,
        region_type: match r.region_type {
            BootRegionType::Usable => MemoryRegionType::Usable,
            BootRegionType::Reserved => MemoryRegionType::Reserved,
            _ => MemoryRegionType::Other,
        },
    });

    dump_memory_map(regions.clone());

    let Some(pool) = FramePool::from_regions(regions, PoolConfig::from_features()) else {
        logging::fatal("memcore: no usable region large enough for the frame pool");
        cpu::fail_stop();
    };

    let mut mm = MemoryManager::new(pool, window, X86ControlRegisters);

    if cfg!(feature = "pgt_dump") {
        mm.dump_active();
    }

    if !demo::on_boot(&mut mm) {
        run_demo_task(&mut mm);
    }

    logging::info("memcore: done, halting");
    arch::halt_loop()
}

fn dump_memory_map(regions: impl Iterator<Item = MemoryRegion>) {
    logging::info("memory map dump start");
    for r in regions {
        logging::info(" mem_region:");
        logging::info_u64("  index", r.index as u64);
        logging::info_hex("  start_phys", r.start_phys);
        logging::info_hex("  end_phys", r.end_phys);
        logging::info_u64("  size_bytes", r.size_bytes());
        logging::info(r.region_type.as_str());
    }
    logging::info("memory map dump end");
}

fn run_demo_task(mm: &mut MemoryManager<X86ControlRegisters>) {
    // イメージ用のフレーム（ファイル 1 ページ + bss 1 ページ、物理的に連続していること）
    let (Ok(text), Ok(bss)) = (mm.allocate_frame(), mm.allocate_frame()) else {
        logging::error("demo task: no frames for the image");
        return;
    };
    if bss.number != text.number + 1 {
        logging::error("demo task: image frames are not contiguous");
        return;
    }

    let paddr = text.start_address();
    mm.write_phys(paddr, &DEMO_TEXT);

    let image = match TaskImage::new(
        VirtAddr(USER_TEXT_START),
        paddr,
        PhysAddr(paddr.0 + DEMO_TEXT.len() as u64),
        VirtAddr(USER_TEXT_START + 2 * PAGE_SIZE),
    ) {
        Ok(image) => image,
        Err(e) => {
            logging::error(e.as_str());
            return;
        }
    };

    let mut task = Task::new(image);
    if mm.build_task(&mut task).is_err() {
        return;
    }
    mm.audit(&task);

    if let Err(e) = mm.activate(&task) {
        logging::error(e.as_str());
        return;
    }

    // タスクの CR3 のまま、user 空間の先頭をカーネルから読んでみる
    // Safety: build が USER_TEXT_START を text フレームに map している
    let first = unsafe { core::ptr::read_volatile(USER_TEXT_START as *const u8) };
    logging::info_hex("demo task: first byte via task CR3", first as u64);
    if first != DEMO_TEXT[0] {
        logging::error("demo task: user text mismatch");
    }

    mm.activate_kernel();
    logging::info("demo task: back on kernel CR3");
}
