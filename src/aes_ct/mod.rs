//! Constant-time bitsliced AES, four blocks wide.
//!
//! The state is held as eight 64-bit words; each word carries one bit
//! position of every byte of up to four interleaved blocks. The S-box is a
//! straight-line boolean circuit (see [`sbox`]), so encryption and
//! decryption never branch or index memory on secret data.
//!
//! The public surface only ever drives one real block through the
//! four-lane machinery at a time; the other three lanes are always
//! zero-padded rather than left uninitialized (see the note on
//! [`AesContext::encrypt`]).

mod bitslice;
mod keysched;
mod sbox;

use system_error::NetCoreError;

use bitslice::{
    add_round_key, inv_mix_columns, inv_shift_rows, interleave_in, interleave_out, mix_columns,
    ortho, shift_rows,
};
use keysched::{keysched, skey_expand};
use sbox::{bitslice_inv_sbox, bitslice_sbox};

/// A set up AES key schedule, ready to encrypt and (optionally) decrypt.
///
/// `num_rounds` is 10, 12 or 14 for 128-, 192- and 256-bit keys
/// respectively. When constructed with `enc_only = true`, the decryption
/// schedule is never computed and [`decrypt`](AesContext::decrypt) fails.
pub struct AesContext {
    ek_exp: [u64; 120],
    dk_exp: [u64; 120],
    num_rounds: u32,
    enc_only: bool,
}

impl AesContext {
    /// A context with no key loaded. [`encrypt`](Self::encrypt) and
    /// [`decrypt`](Self::decrypt) are meaningless until [`setkey`](Self::setkey)
    /// succeeds.
    pub fn new() -> Self {
        AesContext {
            ek_exp: [0u64; 120],
            dk_exp: [0u64; 120],
            num_rounds: 0,
            enc_only: true,
        }
    }

    /// Load a 16-, 24- or 32-byte key, building the encryption schedule and,
    /// unless `enc_only`, the decryption schedule.
    ///
    /// Returns [`NetCoreError::EINVAL`] for any other key length; the
    /// context is left in its prior state (the default is `enc_only = true`
    /// with no schedule, so decrypting a never-successfully-keyed context
    /// also fails).
    pub fn setkey(&mut self, key: &[u8], enc_only: bool) -> Result<(), NetCoreError> {
        let (ek, num_rounds) = keysched(key)?;
        let mut ek_exp = [0u64; 120];
        skey_expand(&mut ek_exp, num_rounds, &ek);

        let dk_exp = if enc_only {
            [0u64; 120]
        } else {
            let (dk, dk_rounds) = keysched(key)?;
            let mut dk_exp = [0u64; 120];
            skey_expand(&mut dk_exp, dk_rounds, &dk);
            dk_exp
        };

        self.ek_exp = ek_exp;
        self.dk_exp = dk_exp;
        self.num_rounds = num_rounds;
        self.enc_only = enc_only;
        Ok(())
    }

    /// Encrypt one 16-byte block.
    ///
    /// The source's naive single-block encrypt path interleaves only one
    /// block into the eight-word bitsliced state and runs `ortho` over the
    /// other six words uninitialized; this port instead zero-pads the three
    /// unused parallel lanes explicitly (the same convention the source
    /// already uses for its multi-block decrypt path), so the result is
    /// deterministic regardless of what the backing memory held before.
    pub fn encrypt(&self, block: &[u8; 16]) -> [u8; 16] {
        let q = bitslice_one_block(block);
        let mut q = q;
        ortho(&mut q);
        bitslice_encrypt(self.num_rounds, &self.ek_exp, &mut q);
        ortho(&mut q);
        unbitslice_one_block(q[0], q[4])
    }

    /// Decrypt one 16-byte block.
    ///
    /// Fails with [`NetCoreError::EINVAL`] if this context was set up with
    /// `enc_only = true` (no decryption schedule was ever computed).
    pub fn decrypt(&self, block: &[u8; 16]) -> Result<[u8; 16], NetCoreError> {
        if self.enc_only {
            return Err(NetCoreError::EINVAL);
        }
        let mut q = bitslice_one_block(block);
        ortho(&mut q);
        bitslice_decrypt(self.num_rounds, &self.dk_exp, &mut q);
        ortho(&mut q);
        Ok(unbitslice_one_block(q[0], q[4]))
    }
}

impl Default for AesContext {
    fn default() -> Self {
        Self::new()
    }
}

fn bitslice_one_block(block: &[u8; 16]) -> [u64; 8] {
    let mut w = [0u32; 4];
    for (i, word) in w.iter_mut().enumerate() {
        *word = u32::from_le_bytes(block[i * 4..i * 4 + 4].try_into().unwrap());
    }
    let (q0, q4) = interleave_in(&w);
    [q0, 0, 0, 0, q4, 0, 0, 0]
}

fn unbitslice_one_block(q0: u64, q4: u64) -> [u8; 16] {
    let w = interleave_out(q0, q4);
    let mut out = [0u8; 16];
    for (i, word) in w.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    out
}

/// Encrypt bitsliced data in place. Since the state packs eight 64-bit
/// words, up to four block encryptions run in parallel; the public API
/// above always leaves three lanes zeroed.
fn bitslice_encrypt(num_rounds: u32, skey: &[u64; 120], q: &mut [u64; 8]) {
    add_round_key(q, &skey[0..8]);
    for u in 1..num_rounds {
        bitslice_sbox(q);
        shift_rows(q);
        mix_columns(q);
        let base = (u as usize) << 3;
        add_round_key(q, &skey[base..base + 8]);
    }
    bitslice_sbox(q);
    shift_rows(q);
    let base = (num_rounds as usize) << 3;
    add_round_key(q, &skey[base..base + 8]);
}

/// Decrypt bitsliced data in place; mirror structure of [`bitslice_encrypt`].
fn bitslice_decrypt(num_rounds: u32, skey: &[u64; 120], q: &mut [u64; 8]) {
    let base = (num_rounds as usize) << 3;
    add_round_key(q, &skey[base..base + 8]);
    for u in (1..num_rounds).rev() {
        inv_shift_rows(q);
        bitslice_inv_sbox(q);
        let base = (u as usize) << 3;
        add_round_key(q, &skey[base..base + 8]);
        inv_mix_columns(q);
    }
    inv_shift_rows(q);
    bitslice_inv_sbox(q);
    add_round_key(q, &skey[0..8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn aes128_fips_kat() {
        let key = hex("000102030405060708090A0B0C0D0E0F");
        let plaintext = hex("00112233445566778899AABBCCDDEEFF");
        let ciphertext = hex("69C4E0D86A7B0430D8CDB78070B4C55A");

        let mut ctx = AesContext::new();
        ctx.setkey(&key, false).unwrap();

        let pt: [u8; 16] = plaintext.clone().try_into().unwrap();
        let ct = ctx.encrypt(&pt);
        assert_eq!(&ct[..], &ciphertext[..]);

        let back = ctx.decrypt(&ct).unwrap();
        assert_eq!(&back[..], &plaintext[..]);
    }

    #[test]
    fn aes256_fips_kat() {
        let key = hex("000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F");
        let plaintext = hex("00112233445566778899AABBCCDDEEFF");
        let ciphertext = hex("8EA2B7CA516745BFEAFC49904B496089");

        let mut ctx = AesContext::new();
        ctx.setkey(&key, false).unwrap();

        let pt: [u8; 16] = plaintext.clone().try_into().unwrap();
        let ct = ctx.encrypt(&pt);
        assert_eq!(&ct[..], &ciphertext[..]);

        let back = ctx.decrypt(&ct).unwrap();
        assert_eq!(&back[..], &plaintext[..]);
    }

    #[test]
    fn rejects_bad_key_length() {
        let mut ctx = AesContext::new();
        assert_eq!(ctx.setkey(&[0u8; 17], false), Err(NetCoreError::EINVAL));
    }

    #[test]
    fn enc_only_context_refuses_to_decrypt() {
        let mut ctx = AesContext::new();
        ctx.setkey(&[0u8; 16], true).unwrap();
        let block = [0u8; 16];
        assert_eq!(ctx.decrypt(&block), Err(NetCoreError::EINVAL));
    }

    #[test]
    fn round_trip_is_identity_for_arbitrary_blocks() {
        let mut ctx = AesContext::new();
        ctx.setkey(b"0123456789abcdef", false).unwrap();
        for b in 0u8..8 {
            let block = [b; 16];
            let ct = ctx.encrypt(&block);
            let pt = ctx.decrypt(&ct).unwrap();
            assert_eq!(pt, block);
        }
    }
}
