use iced_x86::{Decoder, DecoderOptions, Mnemonic};

/// Decode the instruction stream and report the offset of every near or far
/// return. Decoding (instead of matching 0xc3 bytes) avoids false positives in
/// immediates and displacements.
pub(crate) fn return_sites(code: &[u8], start: u64) -> Vec<u64> {
    let mut decoder = Decoder::with_ip(64, code, start, DecoderOptions::NONE);

    decoder
        .iter()
        .filter(|insn| matches!(insn.mnemonic(), Mnemonic::Ret | Mnemonic::Retf))
        .map(|insn| insn.ip())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_returns() {
        let code = [
            0x55, // push rbp
            0x48, 0x89, 0xe5, // mov rbp,rsp
            0xb8, 0xc3, 0x00, 0x00, 0x00, // mov eax,0xc3
            0x85, 0xc0, // test eax,eax
            0x74, 0x01, // je +1
            0xc3, // ret
            0xc3, // ret
            0xc2, 0x08, 0x00, // ret 8
        ];

        assert_eq!(return_sites(&code, 0x1000), vec![0x100d, 0x100e, 0x100f]);
    }

    #[test]
    fn ret_in_operands_is_ignored() {
        let code = [
            0x48, 0x8b, 0x84, 0x24, 0xc3, 0x00, 0x00, 0x00, // mov rax,[rsp+0xc3]
            0x90, // nop
        ];

        assert!(return_sites(&code, 0).is_empty());
    }

    #[test]
    fn truncated_stream() {
        // A partial mov at the end must not panic nor be reported.
        let code = [0xc3, 0x48, 0x8b];

        assert_eq!(return_sites(&code, 0x10), vec![0x10]);
    }
}
