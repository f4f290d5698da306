//! Two-stage firmware download
//!
//! The boot ROM accepts the helper image in fixed 64-byte chunks. Once the
//! helper runs it pulls the main image itself: before every chunk it posts
//! the length it wants in scratch 1, with the low bit set if the previous
//! chunk arrived corrupted. A zero length ends the transfer and the running
//! firmware then leaves a magic value in scratch 4.

use crate::bus::{ChipSelect, SpiBus};
use crate::chip::FirmwareNames;
use crate::error::{Error, Result};
use crate::firmware::{FirmwareProvider, LoadProgress, Stage};
use crate::regs::{
    CardIntCause, HostIntStatus, CARD_INT_CAUSE, CMD_BUF_SIZE, CMD_RDWRPORT, FIRMWARE_DNLD_OK,
    HELPER_FW_LOAD_CHUNK_SZ, HOST_INT_STATUS, MAX_MAIN_FW_LOAD_CRC_ERR, SCRATCH_1, SCRATCH_4,
    SUCCESSFUL_FW_DOWNLOAD_MAGIC,
};
use crate::spu::Spu;

/// Run both download stages
pub fn bootstrap<B, C, F, P>(
    spu: &mut Spu<B, C>,
    names: &FirmwareNames,
    firmware: &F,
    progress: &mut P,
) -> Result<()>
where
    B: SpiBus,
    C: ChipSelect,
    F: FirmwareProvider + ?Sized,
    P: LoadProgress + ?Sized,
{
    prog_helper_firmware(spu, &names.helper, firmware, progress)?;
    prog_main_firmware(spu, &names.main, firmware, progress)?;
    log::info!("fw: loaded firmware for Marvell WLAN 802.11 adapter");
    Ok(())
}

/// Push the helper image to the boot ROM
pub fn prog_helper_firmware<B, C, F, P>(
    spu: &mut Spu<B, C>,
    name: &str,
    firmware: &F,
    progress: &mut P,
) -> Result<()>
where
    B: SpiBus,
    C: ChipSelect,
    F: FirmwareProvider + ?Sized,
    P: LoadProgress + ?Sized,
{
    spu.set_interrupt_mode(true, false)?;
    let image = firmware.load_image(name)?;
    log::info!("fw: loading helper {} ({} bytes)", name, image.len());

    load_helper(spu, &image, progress).inspect_err(|e| {
        log::error!("fw: failed to load helper firmware: {}", e);
    })
}

fn load_helper<B, C, P>(spu: &mut Spu<B, C>, image: &[u8], progress: &mut P) -> Result<()>
where
    B: SpiBus,
    C: ChipSelect,
    P: LoadProgress + ?Sized,
{
    let ready = HostIntStatus::CMD_DOWNLOAD_RDY.bits();
    let chunk_delay = spu.timing().helper_chunk_delay;

    progress.started(Stage::Helper, image.len());
    let mut sent = 0;
    for chunk in image.chunks(HELPER_FW_LOAD_CHUNK_SZ) {
        spu.write_u16(SCRATCH_1, HELPER_FW_LOAD_CHUNK_SZ as u16)?;
        spu.wait_for_u16(HOST_INT_STATUS, ready, ready)?;

        let mut temp = [0u8; HELPER_FW_LOAD_CHUNK_SZ];
        temp[..chunk.len()].copy_from_slice(chunk);
        spu.sleep(chunk_delay);
        spu.write(CMD_RDWRPORT, &temp)?;

        // Interrupt the boot code
        spu.write_u16(HOST_INT_STATUS, 0)?;
        spu.write_u16(CARD_INT_CAUSE, CardIntCause::CMD_DOWNLOAD_OVER.bits())?;

        sent += chunk.len();
        progress.progress(Stage::Helper, sent);
    }

    spu.write_u16(SCRATCH_1, FIRMWARE_DNLD_OK)?;
    spu.write_u16(HOST_INT_STATUS, 0)?;
    spu.write_u16(CARD_INT_CAUSE, CardIntCause::CMD_DOWNLOAD_OVER.bits())?;
    progress.finished(Stage::Helper);
    log::debug!("fw: helper download complete ({} bytes)", sent);
    Ok(())
}

/// Length the helper wants next and whether the previous chunk failed its CRC
fn check_len<B: SpiBus, C: ChipSelect>(spu: &mut Spu<B, C>) -> Result<(usize, bool)> {
    let ready = HostIntStatus::CMD_DOWNLOAD_RDY.bits();
    spu.wait_for_u16(HOST_INT_STATUS, ready, ready)
        .inspect_err(|_| log::error!("fw: timed out waiting for host_int_status"))?;

    let len = spu.read_u16(SCRATCH_1)?;
    if usize::from(len) > CMD_BUF_SIZE {
        log::error!(
            "fw: device requested a larger transfer than we can handle (len = {})",
            len
        );
        return Err(Error::ProtocolViolation(format!(
            "firmware chunk of {} bytes exceeds {} byte buffer",
            len, CMD_BUF_SIZE
        )));
    }
    if len & 0x1 != 0 {
        log::debug!("fw: crc error on previous chunk");
        Ok((usize::from(len & !0x1), true))
    } else {
        Ok((usize::from(len), false))
    }
}

/// Feed the main image to the running helper
pub fn prog_main_firmware<B, C, F, P>(
    spu: &mut Spu<B, C>,
    name: &str,
    firmware: &F,
    progress: &mut P,
) -> Result<()>
where
    B: SpiBus,
    C: ChipSelect,
    F: FirmwareProvider + ?Sized,
    P: LoadProgress + ?Sized,
{
    spu.set_interrupt_mode(true, false)?;
    let image = firmware.load_image(name)?;
    log::info!("fw: loading main firmware {} ({} bytes)", name, image.len());

    load_main(spu, &image, progress).inspect_err(|e| {
        log::error!("fw: failed to load main firmware: {}", e);
    })
}

fn load_main<B, C, P>(spu: &mut Spu<B, C>, image: &[u8], progress: &mut P) -> Result<()>
where
    B: SpiBus,
    C: ChipSelect,
    P: LoadProgress + ?Sized,
{
    let mut cmd_buffer = Vec::new();
    cmd_buffer
        .try_reserve_exact(CMD_BUF_SIZE)
        .map_err(|_| Error::OutOfMemory)?;
    cmd_buffer.resize(CMD_BUF_SIZE, 0);

    spu.wait_for_u16(SCRATCH_1, 0xffff, 0)
        .inspect_err(|_| log::error!("fw: timed out waiting for initial scratch reg = 0"))?;

    progress.started(Stage::Main, image.len());
    let mut num_crc_errs = 0u32;
    let mut prev_len = 0usize;
    let mut offset = 0usize;
    loop {
        let (len, crc_err) = check_len(spu)?;
        if len == 0 {
            break;
        }
        if offset > image.len() {
            // The device should have ended with a zero length by now
            log::error!("fw: firmware load wants more bytes than we have to offer");
            break;
        }
        if crc_err {
            num_crc_errs += 1;
            if num_crc_errs > MAX_MAIN_FW_LOAD_CRC_ERR {
                log::error!("fw: too many CRC errors encountered in firmware load");
                return Err(Error::Io(format!(
                    "{} consecutive CRC errors during firmware load",
                    num_crc_errs
                )));
            }
        } else {
            num_crc_errs = 0;
            offset += prev_len;
            progress.progress(Stage::Main, offset.min(image.len()));
        }

        let chunk = &mut cmd_buffer[..len];
        let rest = image.get(offset..).unwrap_or_default();
        let available = rest.len().min(len);
        chunk.fill(0);
        chunk[..available].copy_from_slice(&rest[..available]);

        spu.write_u16(HOST_INT_STATUS, 0)?;
        spu.write(CMD_RDWRPORT, chunk)?;
        spu.write_u16(CARD_INT_CAUSE, CardIntCause::CMD_DOWNLOAD_OVER.bits())?;
        prev_len = len;
    }
    if image.len().saturating_sub(offset) > prev_len {
        log::warn!("fw: firmware load wants fewer bytes than we have to offer");
    }

    spu.wait_for_u32(SCRATCH_4, SUCCESSFUL_FW_DOWNLOAD_MAGIC)
        .inspect_err(|_| log::error!("fw: failed to confirm the firmware download"))?;
    progress.finished(Stage::Main);
    Ok(())
}
