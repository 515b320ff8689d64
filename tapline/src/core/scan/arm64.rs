use byteorder::{ByteOrder, LittleEndian};

/// RET {Xn}: 1101 0110 0101 1111 0000 00nn nnn0 0000.
const RET_MASK: u32 = 0xffff_fc1f;
const RET: u32 = 0xd65f_0000;
/// Pointer authentication variants, always returning through X30.
const RETAA: u32 = 0xd65f_0bff;
const RETAB: u32 = 0xd65f_0fff;

fn is_return(insn: u32) -> bool {
    insn & RET_MASK == RET || insn == RETAA || insn == RETAB
}

/// Instructions are fixed size and little-endian: check every aligned word.
/// Trailing bytes not forming a full instruction are ignored.
pub(crate) fn return_sites(code: &[u8], start: u64) -> Vec<u64> {
    code.chunks_exact(4)
        .enumerate()
        .filter(|(_, word)| is_return(LittleEndian::read_u32(word)))
        .map(|(i, _)| start + 4 * i as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0xd65f03c0, true ; "ret")]
    #[test_case(0xd65f0020, true ; "ret x1")]
    #[test_case(0xd65f0bff, true ; "retaa")]
    #[test_case(0xd65f0fff, true ; "retab")]
    #[test_case(0xd61f03c0, false ; "br x30")]
    #[test_case(0xd63f0100, false ; "blr x8")]
    #[test_case(0xd503201f, false ; "nop")]
    #[test_case(0xd65f03c1, false ; "invalid low bits")]
    fn encodings(insn: u32, ret: bool) {
        assert_eq!(is_return(insn), ret);
    }

    #[test]
    fn multiple_returns() {
        let words: [u32; 6] = [
            0xa9bf7bfd, // stp x29, x30, [sp, #-16]!
            0xb4000040, // cbz x0, +8
            0xd65f03c0, // ret
            0xa8c17bfd, // ldp x29, x30, [sp], #16
            0xd65f0bff, // retaa
            0xd503201f, // nop
        ];
        let code: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        assert_eq!(return_sites(&code, 0x2000), vec![0x2008, 0x2010]);
    }

    #[test]
    fn trailing_bytes() {
        let code = [0xc0, 0x03, 0x5f, 0xd6, 0xc0, 0x03];
        assert_eq!(return_sites(&code, 0), vec![0]);
    }
}
