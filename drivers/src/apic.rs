use core::sync::atomic::{AtomicU64, Ordering};

use spin::Once;

use slopos_lib::{InitFlag, cpu, klog_debug, klog_info};

use slopos_abi::addr::PhysAddr;
use slopos_abi::arch::x86_64::apic::{ApicBaseMsr, *};
use slopos_abi::arch::x86_64::apic::{
    LAPIC_ICR_DELIVERY_FIXED, LAPIC_ICR_DELIVERY_STATUS, LAPIC_ICR_DEST_BROADCAST,
    LAPIC_ICR_DEST_PHYSICAL, LAPIC_ICR_HIGH, LAPIC_ICR_LEVEL_ASSERT, LAPIC_ICR_LOW,
    LAPIC_ICR_TRIGGER_EDGE,
};
use slopos_abi::arch::x86_64::cpuid::{
    CPUID_FEAT_ECX_X2APIC, CPUID_FEAT_EDX_APIC, CPUID_LEAF_FEATURES,
};
use slopos_abi::arch::x86_64::msr::Msr;
use slopos_abi::arch::x86_64::paging::PAGE_SIZE_4KB_USIZE;
use slopos_mm::mmio::MmioRegion;

mod regs;
pub mod timer;

const APIC_REGION_SIZE: usize = PAGE_SIZE_4KB_USIZE;

static APIC_AVAILABLE: InitFlag = InitFlag::new();
static X2APIC_AVAILABLE: InitFlag = InitFlag::new();
static APIC_ENABLED: InitFlag = InitFlag::new();
static APIC_BASE_PHYSICAL: AtomicU64 = AtomicU64::new(0);

/// MMIO region for Local APIC registers.
/// Initialized once during detect() and used for all register access.
static APIC_REGS: Once<MmioRegion> = Once::new();

pub fn detect() -> bool {
    klog_debug!("APIC: Detecting Local APIC availability...");

    let (_, _, ecx, edx) = cpu::cpuid(CPUID_LEAF_FEATURES);
    if edx & CPUID_FEAT_EDX_APIC == 0 {
        klog_debug!("APIC: Local APIC is not available");
        APIC_AVAILABLE.reset();
        return false;
    }

    APIC_AVAILABLE.mark_set();
    if (ecx & CPUID_FEAT_ECX_X2APIC) != 0 {
        X2APIC_AVAILABLE.mark_set();
    }

    let apic_base_msr = cpu::read_msr(Msr::APIC_BASE);
    let apic_phys = apic_base_msr & ApicBaseMsr::ADDR_MASK;
    APIC_BASE_PHYSICAL.store(apic_phys, Ordering::Relaxed);

    // Map APIC registers via MmioRegion
    let phys_addr = PhysAddr::new(apic_phys);
    match MmioRegion::map(phys_addr, APIC_REGION_SIZE) {
        Some(region) => {
            let virt = region.virt_base();
            APIC_REGS.call_once(|| region);

            let bsp_flag = if apic_base_msr & ApicBaseMsr::BSP != 0 {
                " BSP"
            } else {
                ""
            };
            let x2apic_flag = if apic_base_msr & ApicBaseMsr::X2APIC_ENABLE != 0 {
                " X2APIC"
            } else {
                ""
            };
            let enable_flag = if apic_base_msr & ApicBaseMsr::GLOBAL_ENABLE != 0 {
                " ENABLED"
            } else {
                ""
            };
            klog_debug!(
                "APIC: Physical base: 0x{:x}, Virtual base (HHDM): 0x{:x}",
                apic_phys,
                virt
            );
            klog_debug!("APIC: MSR flags:{}{}{}", bsp_flag, x2apic_flag, enable_flag);
            true
        }
        None => {
            klog_info!("APIC: ERROR - Failed to map APIC registers");
            APIC_AVAILABLE.reset();
            false
        }
    }
}

pub fn init() -> i32 {
    if !is_available() {
        klog_info!("APIC: Cannot initialize - APIC not available");
        return -1;
    }

    klog_debug!("APIC: Initializing Local APIC");

    slopos_lib::register_lapic_id_fn(get_id);
    slopos_lib::register_send_ipi_to_cpu_fn(send_ipi_to_cpu);

    let mut apic_base_msr = cpu::read_msr(Msr::APIC_BASE);
    if apic_base_msr & ApicBaseMsr::GLOBAL_ENABLE == 0 {
        apic_base_msr |= ApicBaseMsr::GLOBAL_ENABLE;
        cpu::write_msr(Msr::APIC_BASE, apic_base_msr);
        klog_debug!("APIC: Enabled APIC globally via MSR");
    }

    enable();

    write_register(LAPIC_LVT_TIMER, LAPIC_LVT_MASKED);
    write_register(LAPIC_LVT_LINT0, LAPIC_LVT_MASKED);
    write_register(LAPIC_LVT_LINT1, LAPIC_LVT_MASKED);
    write_register(LAPIC_LVT_ERROR, LAPIC_LVT_MASKED);
    write_register(LAPIC_LVT_PERFCNT, LAPIC_LVT_MASKED);

    write_register(LAPIC_LVT_LINT0, LAPIC_LVT_DELIVERY_MODE_EXTINT);

    write_register(LAPIC_ESR, 0);
    write_register(LAPIC_ESR, 0);

    send_eoi();

    let apic_id = get_id();
    let apic_version = get_version();
    klog_debug!("APIC: ID: 0x{:x}, Version: 0x{:x}", apic_id, apic_version);

    APIC_ENABLED.mark_set();
    klog_debug!("APIC: Initialization complete");
    0
}

pub fn is_available() -> bool {
    APIC_AVAILABLE.is_set_relaxed()
}

pub fn is_x2apic_available() -> bool {
    X2APIC_AVAILABLE.is_set_relaxed()
}

pub fn is_bsp() -> bool {
    if !is_available() {
        return false;
    }
    let apic_base_msr = cpu::read_msr(Msr::APIC_BASE);
    (apic_base_msr & ApicBaseMsr::BSP) != 0
}

pub fn is_enabled() -> bool {
    APIC_ENABLED.is_set_relaxed()
}

pub fn enable() {
    if !is_available() {
        return;
    }
    let mut spurious = read_register(LAPIC_SPURIOUS);
    spurious |= LAPIC_SPURIOUS_ENABLE;
    spurious |= 0xFF;
    write_register(LAPIC_SPURIOUS, spurious);
    APIC_ENABLED.mark_set();
    klog_debug!("APIC: Local APIC enabled");
}

pub fn disable() {
    if !is_available() {
        return;
    }
    let mut spurious = read_register(LAPIC_SPURIOUS);
    spurious &= !LAPIC_SPURIOUS_ENABLE;
    write_register(LAPIC_SPURIOUS, spurious);
    APIC_ENABLED.reset();
    klog_debug!("APIC: Local APIC disabled");
}

pub fn send_eoi() {
    if !is_enabled() {
        return;
    }
    write_register(LAPIC_EOI, 0);
}

pub fn get_id() -> u32 {
    if !is_available() {
        return 0;
    }
    read_register(LAPIC_ID) >> 24
}

pub fn get_version() -> u32 {
    if !is_available() {
        return 0;
    }
    read_register(LAPIC_VERSION) & 0xFF
}

pub fn timer_init(vector: u32, frequency: u32) {
    if !is_enabled() {
        return;
    }
    klog_debug!(
        "APIC: Initializing timer with vector 0x{:x} and frequency {}",
        vector,
        frequency
    );

    timer_set_divisor(LAPIC_TIMER_DIV_16);

    let lvt_timer = vector | LAPIC_TIMER_PERIODIC;
    write_register(LAPIC_LVT_TIMER, lvt_timer);

    let initial_count = 1_000_000u32.saturating_div(frequency.max(1));
    timer_start(initial_count);
    klog_debug!("APIC: Timer initialized");
}

pub fn timer_start(initial_count: u32) {
    if !is_enabled() {
        return;
    }
    write_register(LAPIC_TIMER_ICR, initial_count);
}

pub fn timer_stop() {
    if !is_enabled() {
        return;
    }
    write_register(LAPIC_TIMER_ICR, 0);
}

pub fn timer_get_current_count() -> u32 {
    if !is_enabled() {
        return 0;
    }
    read_register(LAPIC_TIMER_CCR)
}

pub fn timer_set_divisor(divisor: u32) {
    if !is_enabled() {
        return;
    }
    write_register(LAPIC_TIMER_DCR, divisor);
}

const IPI_POLL_LIMIT: u32 = 10_000;
const ICR_DEST_ALL_EXCLUDING_SELF: u32 = 0x3 << 18;

fn wait_icr_idle() {
    let mut remaining = IPI_POLL_LIMIT;
    while (read_register(LAPIC_ICR_LOW) & LAPIC_ICR_DELIVERY_STATUS) != 0 && remaining > 0 {
        cpu::pause();
        remaining -= 1;
    }
}

fn send_ipi_raw(icr_high: u32, icr_low: u32) {
    if !is_available() || !is_enabled() {
        return;
    }
    wait_icr_idle();
    write_register(LAPIC_ICR_HIGH, icr_high);
    write_register(LAPIC_ICR_LOW, icr_low);
    wait_icr_idle();
}

fn fixed_ipi_flags(vector: u32) -> u32 {
    vector
        | LAPIC_ICR_DELIVERY_FIXED
        | LAPIC_ICR_DEST_PHYSICAL
        | LAPIC_ICR_LEVEL_ASSERT
        | LAPIC_ICR_TRIGGER_EDGE
}

pub fn send_ipi_halt_all() {
    const SHUTDOWN_VECTOR: u32 = 0xFE;
    send_ipi_raw(LAPIC_ICR_DEST_BROADCAST, fixed_ipi_flags(SHUTDOWN_VECTOR));
    klog_debug!("APIC: Sent shutdown IPI to all processors");
}

pub fn get_base_address() -> u64 {
    APIC_REGS.get().map(|r| r.virt_base()).unwrap_or(0)
}

pub fn set_base_address(base: u64) {
    if !is_available() {
        return;
    }
    let masked_base = base & ApicBaseMsr::ADDR_MASK;
    let mut apic_base_msr = cpu::read_msr(Msr::APIC_BASE);
    apic_base_msr = (apic_base_msr & !ApicBaseMsr::ADDR_MASK) | masked_base;
    cpu::write_msr(Msr::APIC_BASE, apic_base_msr);

    APIC_BASE_PHYSICAL.store(masked_base, Ordering::Relaxed);
    // Note: APIC_REGS is initialized once during detect() and cannot be updated.
    // Changing the APIC base address at runtime requires re-initialization.
    klog_info!(
        "APIC: Base address changed to 0x{:x} - restart required for new mapping",
        masked_base
    );
}

pub fn read_register(reg: u32) -> u32 {
    if !is_available() {
        return 0;
    }
    APIC_REGS
        .get()
        .map(|r| r.read_u32(reg as usize))
        .unwrap_or(0)
}

pub fn write_register(reg: u32, value: u32) {
    if !is_available() {
        return;
    }
    if let Some(r) = APIC_REGS.get() {
        r.write_u32(reg as usize, value);
    }
}

pub fn dump_state() {
    klog_info!("=== APIC STATE DUMP ===");
    if !is_available() {
        klog_info!("APIC: Not available");
        klog_info!("=== END APIC STATE DUMP ===");
        return;
    }

    klog_info!(
        "APIC Available: Yes, x2APIC: {}",
        if is_x2apic_available() { "Yes" } else { "No" }
    );
    klog_info!("APIC Enabled: {}", if is_enabled() { "Yes" } else { "No" });
    klog_info!(
        "Bootstrap Processor: {}",
        if is_bsp() { "Yes" } else { "No" }
    );
    klog_info!("Base Address: 0x{:x}", get_base_address());

    if is_enabled() {
        let spurious = read_register(LAPIC_SPURIOUS);
        let esr = read_register(LAPIC_ESR);
        let lvt_timer = read_register(LAPIC_LVT_TIMER);
        let timer_count = timer_get_current_count();
        klog_info!("APIC ID: 0x{:x}", get_id());
        klog_info!("APIC Version: 0x{:x}", get_version());
        klog_info!("Spurious Vector Register: 0x{:x}", spurious);
        klog_info!("Error Status Register: 0x{:x}", esr);
        klog_info!(
            "Timer LVT: 0x{:x}{}",
            lvt_timer,
            if lvt_timer & LAPIC_LVT_MASKED != 0 {
                " (MASKED)"
            } else {
                ""
            }
        );
        klog_info!("Timer Current Count: 0x{:x}", timer_count);
    }

    klog_info!("=== END APIC STATE DUMP ===");
}

pub fn send_ipi_all_excluding_self(vector: u8) {
    send_ipi_raw(
        0,
        fixed_ipi_flags(vector as u32) | ICR_DEST_ALL_EXCLUDING_SELF,
    );
}

pub fn send_ipi_to_cpu(target_apic_id: u32, vector: u8) {
    send_ipi_raw(target_apic_id << 24, fixed_ipi_flags(vector as u32));
}
