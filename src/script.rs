//! Script inspection: legacy signature-operation counting, and the seam to
//! an external script interpreter.

use crate::types::*;

pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Legacy counting charges every multisig the maximum key count.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Pass/fail script verification for a single input. The interpreter itself
/// lives outside this crate.
pub trait ScriptVerifier {
    fn verify(
        &self,
        script_sig: &[u8],
        script_pubkey: &[u8],
        tx: &Transaction,
        input_index: usize,
        flags: u32,
    ) -> bool;
}

/// Walk the opcodes of `script`, skipping push payloads. Stops at the first
/// truncated push.
fn opcodes(script: &[u8]) -> impl Iterator<Item = u8> + '_ {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        let opcode = *script.get(pos)?;
        pos += 1;
        let push_len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => {
                let len = *script.get(pos)? as usize;
                pos += 1;
                len
            }
            OP_PUSHDATA2 => {
                let bytes = script.get(pos..pos + 2)?;
                pos += 2;
                u16::from_le_bytes([bytes[0], bytes[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let bytes = script.get(pos..pos + 4)?;
                pos += 4;
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
            _ => 0,
        };
        if push_len > script.len() - pos {
            pos = script.len();
            return None;
        }
        pos += push_len;
        Some(opcode)
    })
}

/// Legacy (inaccurate) signature-operation count of a script
pub fn legacy_sigop_count(script: &[u8]) -> usize {
    opcodes(script)
        .map(|opcode| match opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => MAX_PUBKEYS_PER_MULTISIG,
            _ => 0,
        })
        .sum()
}

/// Legacy signature operations across every input and output script of `tx`
pub fn transaction_legacy_sigops(tx: &Transaction) -> usize {
    let inputs: usize = tx.inputs.iter().map(|i| legacy_sigop_count(&i.script_sig)).sum();
    let outputs: usize = tx
        .outputs
        .iter()
        .map(|o| legacy_sigop_count(&o.script_pubkey))
        .sum();
    inputs + outputs
}
